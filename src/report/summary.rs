use std::{collections::BTreeMap, fmt::Write};

use serde::{Deserialize, Serialize};

use crate::report::{binning::SegmentAssignment, catalog::DefectCatalog};

/// Defect text of a segment with no detections.
pub const EMPTY_SEGMENT_TEXT: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment_index: usize,
    pub label: String,
    pub defect_text: String,
}

/// Render one segment's class codes as `"name(count) name(count)"`, in ascending
/// class-code order, or `"-"` when there is nothing to report.
///
/// Codes missing from the catalog are rendered with the unknown-code label.
pub fn summarize(class_codes: &[u32], catalog: &DefectCatalog) -> String {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for &code in class_codes {
        *counts.entry(code).or_insert(0) += 1;
    }

    let mut text = String::new();
    for (code, count) in counts {
        // Writing into a String cannot fail.
        let _ = write!(text, "{}({}) ", catalog.lookup(code), count);
    }

    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        EMPTY_SEGMENT_TEXT.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn summarize_segments(
    assignment: &SegmentAssignment,
    catalog: &DefectCatalog,
) -> Vec<SegmentSummary> {
    assignment
        .buckets()
        .iter()
        .map(|bucket| SegmentSummary {
            segment_index: bucket.bin.index,
            label: bucket.bin.label(),
            defect_text: summarize(&bucket.class_codes, catalog),
        })
        .collect()
}
