//! Integration tests for report composition and HTML rendering.
//!
//! Tests cover:
//! - Document block order and fixed header fields
//! - Table shape and merged first-row cells
//! - HTML output: rowspans, escaping, page setup

mod common;

use weldscan::config::ReportConfig;
use weldscan::error::RenderError;
use weldscan::report::compose::{Block, COLUMN_HEADERS, MERGED_COLUMNS};
use weldscan::report::{
    Cell, DocumentRenderer, HtmlRenderer, ReportComposer, ReportDocument, RowKind, StyleSheet,
    summarize_detections,
};

use common::*;

fn reference_segments() -> Vec<SegmentSummary> {
    let detections = vec![detection(0, 50.0), detection(0, 300.0), detection(2, 305.0)];
    summarize_detections(&detections, &default_layout(), &test_catalog())
}

#[test]
fn test_table_has_header_plus_one_row_per_segment() {
    let config = ReportConfig::default();
    let segments = reference_segments();

    let table = ReportComposer::new(&config).table(&segments);

    assert_eq!(table.columns, 9);
    assert_eq!(table.rows.len(), segments.len() + 1);
    assert_eq!(table.header().map(|row| row.kind), Some(RowKind::Header));
    assert_eq!(table.data_rows().count(), segments.len());
    assert!(table.rows.iter().all(|row| row.cells.len() == 9));
}

#[test]
fn test_header_titles() {
    let config = ReportConfig::default();
    let table = ReportComposer::new(&config).table(&reference_segments());
    let header = table.header().expect("header row");

    let titles: Vec<&str> = header.cells.iter().filter_map(|cell| cell.as_text()).collect();
    assert_eq!(titles, COLUMN_HEADERS.to_vec());
}

#[test]
fn test_first_row_spans_merged_columns() {
    let config = ReportConfig::default();
    let segments = reference_segments();
    let table = ReportComposer::new(&config).table(&segments);
    let rows: Vec<_> = table.data_rows().collect();

    assert_eq!(
        rows[0].cells[0],
        Cell::Spanning {
            text: config.joint_id.clone(),
            rows: segments.len()
        }
    );
    assert_eq!(
        rows[0].cells[1],
        Cell::Spanning {
            text: "1020x17".into(),
            rows: segments.len()
        }
    );
    for row in &rows[1..] {
        assert!(row.cells[..MERGED_COLUMNS].iter().all(|cell| *cell == Cell::Covered));
    }
}

#[test]
fn test_data_row_columns() {
    let config = ReportConfig::default();
    let table = ReportComposer::new(&config).table(&reference_segments());
    let rows: Vec<_> = table.data_rows().collect();

    let first: Vec<Option<&str>> = rows[0].cells[MERGED_COLUMNS..]
        .iter()
        .map(|cell| cell.as_text())
        .collect();
    assert_eq!(
        first,
        vec![
            Some("0-300"),
            Some("0,50"),
            Some("pora(2)"),
            Some("н/п"),
            Some("годен"),
            Some("н/п"),
        ]
    );

    let wrap = rows.last().expect("wraparound row");
    assert_eq!(wrap.cells[3].as_text(), Some("3000-0"));
    assert_eq!(wrap.cells[5].as_text(), Some("pora(2)"));
}

#[test]
fn test_document_blocks() {
    let config = ReportConfig::default();
    let document = ReportComposer::new(&config).compose(&reference_segments());

    assert_eq!(document.title, "ЗАКЛЮЧЕНИЕ № 100-400-ЛС");
    let headings: Vec<&str> = document
        .blocks
        .iter()
        .filter_map(|block| match block {
            Block::Heading { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        headings,
        vec![
            "СП 392.1325800.2018",
            "ЗАКЛЮЧЕНИЕ № 100-400-ЛС",
            "от 01.03.2021 года",
        ]
    );
    assert!(document.table().is_some());
    assert!(matches!(document.blocks.last(), Some(Block::Spacer { .. })));
}

#[test]
fn test_html_rendering() -> anyhow::Result<()> {
    let config = ReportConfig::default();
    let segments = reference_segments();
    let document = ReportComposer::new(&config).compose(&segments);

    let bytes = HtmlRenderer.render(&document, &StyleSheet::default())?;
    let html = String::from_utf8(bytes)?;

    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("@page { size: 210mm 297mm; margin: 10mm 15mm 10mm 15mm; }"));
    assert!(html.contains("<thead>"));
    assert!(html.contains(&format!("rowspan=\"{}\"", segments.len())));
    assert!(html.contains("<td>pora(2)</td>"));
    assert!(html.contains("<td>3000-0</td>"));
    assert_eq!(html.matches("<tr>").count(), segments.len() + 1);
    assert_eq!(html.matches("<col ").count(), 9);
    assert_eq!(HtmlRenderer.extension(), "html");
    Ok(())
}

#[test]
fn test_html_escapes_text() -> anyhow::Result<()> {
    let config = ReportConfig {
        joint_id: "<A&B>".into(),
        ..ReportConfig::default()
    };
    let document = ReportComposer::new(&config).compose(&reference_segments());

    let html = String::from_utf8(HtmlRenderer.render(&document, &StyleSheet::default())?)?;
    assert!(html.contains("&lt;A&amp;B&gt;"));
    assert!(!html.contains("<A&B>"));
    Ok(())
}

#[test]
fn test_render_without_table_fails() {
    let document = ReportDocument {
        title: "empty".into(),
        blocks: vec![Block::Heading {
            text: "no table".into(),
        }],
    };
    let err = HtmlRenderer
        .render(&document, &StyleSheet::default())
        .unwrap_err();
    assert!(matches!(err, RenderError::MissingTable));
}
