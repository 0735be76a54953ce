pub mod annotations;
pub mod binning;
pub mod catalog;
pub mod compose;
pub mod render;
pub mod summary;

use tracing::warn;

use crate::models::Detection;

pub use annotations::parse_defect_rects;
pub use binning::{SegmentAssignment, SegmentBucket, SegmentLayout, WeldSegmentBin};
pub use catalog::{DefectCatalog, UNKNOWN_CODE_LABEL};
pub use compose::{Cell, ReportComposer, ReportDocument, Row, RowKind, TableModel};
pub use render::{DocumentRenderer, HtmlRenderer, StyleSheet};
pub use summary::{EMPTY_SEGMENT_TEXT, SegmentSummary, summarize};

/// Bin detections into segments and summarize every segment.
pub fn summarize_detections(
    detections: &[Detection],
    layout: &SegmentLayout,
    catalog: &DefectCatalog,
) -> Vec<SegmentSummary> {
    let unknown = detections
        .iter()
        .filter(|detection| !catalog.contains(detection.class_code))
        .count();
    if unknown > 0 {
        warn!(unknown, classes = catalog.len(), "class codes missing from the defect catalog");
    }
    let assignment = layout.assign(detections);
    summary::summarize_segments(&assignment, catalog)
}
