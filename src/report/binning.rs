//! Maps detections onto fixed-width physical weld segments.
//!
//! The imaged weld length is split into `segment_count - 1` regular segments of
//! `segment_width` units plus one wraparound segment for the seam closure. Only a
//! detection's `x1` is used as the spatial key.
//!
//! Two counting rules are kept on purpose because issued reports depend on the exact
//! counts:
//! - regular segment ranges are inclusive at both ends, so an `x1` on a shared
//!   boundary lands in both neighbouring segments;
//! - the wraparound segment is evaluated independently, so a detection near either
//!   end appears in its regular segment and in the wraparound segment.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::Detection;

pub const DEFAULT_SEGMENT_WIDTH: u32 = 300;
pub const DEFAULT_SEGMENT_COUNT: u32 = 11;
pub const DEFAULT_EDGE_MARGIN: u32 = 300;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidLayout {
    #[error("segment width must be positive")]
    ZeroWidth,
    #[error("segment count must be at least 2 (one regular and one wraparound), got {0}")]
    TooFewSegments(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    segment_width: u32,
    segment_count: u32,
    edge_margin: u32,
}

impl Default for SegmentLayout {
    fn default() -> Self {
        Self {
            segment_width: DEFAULT_SEGMENT_WIDTH,
            segment_count: DEFAULT_SEGMENT_COUNT,
            edge_margin: DEFAULT_EDGE_MARGIN,
        }
    }
}

/// One physical segment. For the wraparound segment `range_end` is 0, which is also
/// how its label signals wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeldSegmentBin {
    pub index: usize,
    pub range_start: u64,
    pub range_end: u64,
    pub is_wraparound: bool,
}

impl WeldSegmentBin {
    /// `"{start}-{end}"`, e.g. `"300-600"`, or `"3000-0"` for the wraparound segment.
    pub fn label(&self) -> String {
        format!("{}-{}", self.range_start, self.range_end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentBucket {
    pub bin: WeldSegmentBin,
    pub class_codes: Vec<u32>,
}

/// Per-segment class codes, indexed by segment index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentAssignment {
    buckets: Vec<SegmentBucket>,
    dropped: usize,
}

impl SegmentAssignment {
    pub fn buckets(&self) -> &[SegmentBucket] {
        &self.buckets
    }

    /// Class codes assigned to segment `index`; empty for an unknown index.
    pub fn codes(&self, index: usize) -> &[u32] {
        self.buckets
            .get(index)
            .map(|bucket| bucket.class_codes.as_slice())
            .unwrap_or(&[])
    }

    /// Total entries across the regular (non-wraparound) segments.
    pub fn regular_entry_count(&self) -> usize {
        self.buckets
            .iter()
            .filter(|bucket| !bucket.bin.is_wraparound)
            .map(|bucket| bucket.class_codes.len())
            .sum()
    }

    /// Detections that matched no segment at all.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl SegmentLayout {
    pub fn new(
        segment_width: u32,
        segment_count: u32,
        edge_margin: u32,
    ) -> Result<Self, InvalidLayout> {
        if segment_width == 0 {
            return Err(InvalidLayout::ZeroWidth);
        }
        if segment_count < 2 {
            return Err(InvalidLayout::TooFewSegments(segment_count));
        }
        Ok(Self {
            segment_width,
            segment_count,
            edge_margin,
        })
    }

    pub fn segment_width(&self) -> u32 {
        self.segment_width
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    pub fn edge_margin(&self) -> u32 {
        self.edge_margin
    }

    pub fn total_length(&self) -> u64 {
        u64::from(self.segment_width) * u64::from(self.segment_count - 1)
    }

    pub fn wraparound_index(&self) -> usize {
        (self.segment_count - 1) as usize
    }

    /// All segments in index order, the wraparound segment last. Recomputed on demand.
    pub fn bins(&self) -> Vec<WeldSegmentBin> {
        let width = u64::from(self.segment_width);
        (0..self.segment_count as usize)
            .map(|index| {
                let range_start = index as u64 * width;
                if index == self.wraparound_index() {
                    WeldSegmentBin {
                        index,
                        range_start,
                        range_end: 0,
                        is_wraparound: true,
                    }
                } else {
                    WeldSegmentBin {
                        index,
                        range_start,
                        range_end: range_start + width,
                        is_wraparound: false,
                    }
                }
            })
            .collect()
    }

    /// Whether `x1` falls in regular segment `bin`, bounds inclusive.
    fn in_regular(&self, bin: &WeldSegmentBin, x1: f64) -> bool {
        !bin.is_wraparound && bin.range_start as f64 <= x1 && x1 <= bin.range_end as f64
    }

    /// Whether `x1` lies within `edge_margin` of either end of the imaged length.
    pub fn in_wraparound(&self, x1: f64) -> bool {
        let margin = f64::from(self.edge_margin);
        x1 <= margin || x1 >= self.total_length() as f64 - margin
    }

    /// Assign every detection to all segments it belongs to, preserving input order
    /// within each segment. Never fails; unmatched detections are counted as dropped.
    pub fn assign(&self, detections: &[Detection]) -> SegmentAssignment {
        let mut buckets: Vec<SegmentBucket> = self
            .bins()
            .into_iter()
            .map(|bin| SegmentBucket {
                bin,
                class_codes: Vec::new(),
            })
            .collect();
        let wrap = self.wraparound_index();
        let mut dropped = 0;

        for detection in detections {
            let x1 = detection.x1();
            let mut matched = false;

            for bucket in buckets.iter_mut() {
                if self.in_regular(&bucket.bin, x1) {
                    bucket.class_codes.push(detection.class_code);
                    matched = true;
                }
            }

            if self.in_wraparound(x1) {
                buckets[wrap].class_codes.push(detection.class_code);
                matched = true;
            }

            if !matched {
                debug!(
                    x1,
                    class_code = detection.class_code,
                    total_length = self.total_length(),
                    "detection outside every segment, dropped from aggregation"
                );
                dropped += 1;
            }
        }

        SegmentAssignment { buckets, dropped }
    }
}
