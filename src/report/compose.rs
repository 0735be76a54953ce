//! Renderer-agnostic report document model.

use serde::Serialize;

use crate::config::ReportConfig;
use crate::report::summary::SegmentSummary;

/// Column titles of the results table, in order.
pub const COLUMN_HEADERS: [&str; 9] = [
    "Номер сварного соединения по журналу сварки",
    "Диаметр и толщина (радиационная номинальная) стенки трубы, мм",
    "Шифр бригады или клеймо сварщика",
    "Номер участка контроля (координаты мерного пояса)",
    "Чувствительность контроля, мм",
    "Описание выявленных дефектов",
    "Координаты недопустимых дефектов по периметру шва",
    "Заключение (годен, ремонт, вырезать)",
    "Примечания",
];

/// Number of leading columns that are only filled on the first data row and span the
/// rest of the table.
pub const MERGED_COLUMNS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cell {
    Text { text: String },
    /// Occupies this row and the `rows - 1` rows below it.
    Spanning { text: String, rows: usize },
    /// Position covered by a spanning cell above; renders nothing of its own.
    Covered,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Cell::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text { text } | Cell::Spanning { text, .. } => Some(text),
            Cell::Covered => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Header,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub kind: RowKind,
    pub cells: Vec<Cell>,
}

/// Ordered rows of ordered cells. The first row is the header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableModel {
    pub columns: usize,
    pub rows: Vec<Row>,
}

impl TableModel {
    pub fn header(&self) -> Option<&Row> {
        self.rows.iter().find(|row| row.kind == RowKind::Header)
    }

    pub fn data_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|row| row.kind == RowKind::Data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Heading { text: String },
    Paragraph { lines: Vec<String> },
    Spacer { points: u32 },
    Table { table: TableModel },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub blocks: Vec<Block>,
}

impl ReportDocument {
    pub fn table(&self) -> Option<&TableModel> {
        self.blocks.iter().find_map(|block| match block {
            Block::Table { table } => Some(table),
            _ => None,
        })
    }
}

pub struct ReportComposer<'a> {
    config: &'a ReportConfig,
}

impl<'a> ReportComposer<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self, segments: &[SegmentSummary]) -> ReportDocument {
        let config = self.config;
        let title = format!("ЗАКЛЮЧЕНИЕ № {}", config.report_number);

        let mut intro = config.intro_lines.clone();
        intro.push(String::new());
        intro.push(config.results_heading.clone());

        let blocks = vec![
            Block::Heading {
                text: config.standard.clone(),
            },
            Block::Spacer { points: 10 },
            Block::Heading {
                text: title.clone(),
            },
            Block::Heading {
                text: format!("от {} года", config.report_date),
            },
            Block::Spacer { points: 15 },
            Block::Paragraph { lines: intro },
            Block::Spacer { points: 10 },
            Block::Table {
                table: self.table(segments),
            },
            Block::Spacer { points: 10 },
        ];

        ReportDocument { title, blocks }
    }

    /// One header row plus one data row per segment, in segment order.
    pub fn table(&self, segments: &[SegmentSummary]) -> TableModel {
        let config = self.config;
        let mut rows = Vec::with_capacity(segments.len() + 1);
        rows.push(Row {
            kind: RowKind::Header,
            cells: COLUMN_HEADERS.iter().map(|title| Cell::text(*title)).collect(),
        });

        let span = segments.len();
        let merged: [&String; MERGED_COLUMNS] =
            [&config.joint_id, &config.pipe_size, &config.welder_stamp];
        for (position, segment) in segments.iter().enumerate() {
            let mut cells = Vec::with_capacity(COLUMN_HEADERS.len());
            for value in merged {
                cells.push(if position == 0 {
                    Cell::Spanning {
                        text: value.clone(),
                        rows: span,
                    }
                } else {
                    Cell::Covered
                });
            }
            cells.push(Cell::text(segment.label.as_str()));
            cells.push(Cell::text(config.sensitivity.as_str()));
            cells.push(Cell::text(segment.defect_text.as_str()));
            cells.push(Cell::text(config.not_applicable.as_str()));
            cells.push(Cell::text(config.conclusion.as_str()));
            cells.push(Cell::text(config.not_applicable.as_str()));
            rows.push(Row {
                kind: RowKind::Data,
                cells,
            });
        }

        TableModel {
            columns: COLUMN_HEADERS.len(),
            rows,
        }
    }
}
