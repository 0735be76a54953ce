use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::report::compose::{Block, Cell, ReportDocument, RowKind, TableModel};

/// Page and typography settings handed to a renderer. Lengths in millimetres,
/// font sizes in points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSheet {
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub margin_left_mm: f32,
    pub margin_right_mm: f32,
    pub margin_top_mm: f32,
    pub margin_bottom_mm: f32,
    pub font_family: String,
    pub header_font_pt: f32,
    pub body_font_pt: f32,
    pub table_font_pt: f32,
    pub column_widths_mm: Vec<f32>,
}

impl Default for StyleSheet {
    /// A4 portrait, sized for the nine-column results table.
    fn default() -> Self {
        Self {
            page_width_mm: 210.0,
            page_height_mm: 297.0,
            margin_left_mm: 15.0,
            margin_right_mm: 15.0,
            margin_top_mm: 10.0,
            margin_bottom_mm: 10.0,
            font_family: "Arial, \"Liberation Sans\", sans-serif".into(),
            header_font_pt: 12.0,
            body_font_pt: 10.0,
            table_font_pt: 8.0,
            column_widths_mm: vec![25.0, 20.0, 20.0, 19.0, 20.0, 20.0, 26.0, 25.0, 10.0],
        }
    }
}

/// Turns a composed report into document bytes.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &ReportDocument, style: &StyleSheet) -> Result<Vec<u8>, RenderError>;

    /// File extension for stored artifacts, without the dot.
    fn extension(&self) -> &'static str;

    fn content_type(&self) -> &'static str;
}

/// Print-ready HTML. Pagination comes from `@page` rules and the table header repeats on
/// every printed page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl DocumentRenderer for HtmlRenderer {
    fn render(&self, document: &ReportDocument, style: &StyleSheet) -> Result<Vec<u8>, RenderError> {
        if document.table().is_none() {
            return Err(RenderError::MissingTable);
        }

        let mut out = String::new();
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"ru\">")?;
        writeln!(out, "<head>")?;
        writeln!(out, "<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>{}</title>", escape(&document.title))?;
        write_style(&mut out, style)?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;

        for block in &document.blocks {
            match block {
                Block::Heading { text } => {
                    writeln!(out, "<h1>{}</h1>", escape(text))?;
                }
                Block::Paragraph { lines } => {
                    let body = lines
                        .iter()
                        .map(|line| escape(line))
                        .collect::<Vec<_>>()
                        .join("<br>");
                    writeln!(out, "<p class=\"body\">{}</p>", body)?;
                }
                Block::Spacer { points } => {
                    writeln!(out, "<div class=\"spacer\" style=\"height: {}pt\"></div>", points)?;
                }
                Block::Table { table } => write_table(&mut out, table, style)?,
            }
        }

        writeln!(out, "</body>")?;
        writeln!(out, "</html>")?;
        Ok(out.into_bytes())
    }

    fn extension(&self) -> &'static str {
        "html"
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

fn write_style(out: &mut String, style: &StyleSheet) -> std::fmt::Result {
    writeln!(out, "<style>")?;
    writeln!(
        out,
        "@page {{ size: {}mm {}mm; margin: {}mm {}mm {}mm {}mm; }}",
        style.page_width_mm,
        style.page_height_mm,
        style.margin_top_mm,
        style.margin_right_mm,
        style.margin_bottom_mm,
        style.margin_left_mm
    )?;
    writeln!(out, "body {{ font-family: {}; }}", style.font_family)?;
    writeln!(
        out,
        "h1 {{ font-size: {}pt; font-weight: bold; text-align: center; margin: 0 0 6pt 0; }}",
        style.header_font_pt
    )?;
    writeln!(
        out,
        "p.body {{ font-size: {}pt; text-align: center; margin: 0 0 12pt 0; }}",
        style.body_font_pt
    )?;
    writeln!(
        out,
        "table {{ border-collapse: collapse; table-layout: fixed; margin: 0 auto; }}"
    )?;
    writeln!(
        out,
        "th, td {{ border: 0.5pt solid black; font-size: {}pt; text-align: center; vertical-align: middle; padding: 2pt; font-weight: normal; }}",
        style.table_font_pt
    )?;
    writeln!(out, "thead {{ display: table-header-group; }}")?;
    writeln!(out, "tr {{ page-break-inside: avoid; }}")?;
    writeln!(out, "</style>")
}

fn write_table(out: &mut String, table: &TableModel, style: &StyleSheet) -> std::fmt::Result {
    writeln!(out, "<table>")?;
    if !style.column_widths_mm.is_empty() {
        writeln!(out, "<colgroup>")?;
        for width in style.column_widths_mm.iter().take(table.columns) {
            writeln!(out, "<col style=\"width: {}mm\">", width)?;
        }
        writeln!(out, "</colgroup>")?;
    }

    let (header, data): (Vec<_>, Vec<_>) = table
        .rows
        .iter()
        .partition(|row| row.kind == RowKind::Header);

    writeln!(out, "<thead>")?;
    for row in header {
        write!(out, "<tr>")?;
        for cell in &row.cells {
            write_cell(out, "th", cell)?;
        }
        writeln!(out, "</tr>")?;
    }
    writeln!(out, "</thead>")?;

    writeln!(out, "<tbody>")?;
    for row in data {
        write!(out, "<tr>")?;
        for cell in &row.cells {
            write_cell(out, "td", cell)?;
        }
        writeln!(out, "</tr>")?;
    }
    writeln!(out, "</tbody>")?;
    writeln!(out, "</table>")
}

fn write_cell(out: &mut String, tag: &str, cell: &Cell) -> std::fmt::Result {
    match cell {
        Cell::Text { text } => write!(out, "<{tag}>{}</{tag}>", escape(text)),
        Cell::Spanning { text, rows } => {
            write!(out, "<{tag} rowspan=\"{}\">{}</{tag}>", rows.max(&1), escape(text))
        }
        Cell::Covered => Ok(()),
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
