//! Integration tests for segment binning.
//!
//! Tests cover:
//! - Segment layout and labels
//! - The reference three-detection scenario
//! - Boundary duplication and wraparound re-evaluation
//! - Out-of-range and empty inputs

mod common;

use weldscan::report::binning::InvalidLayout;

use common::*;

#[test]
fn test_default_layout() {
    let layout = default_layout();

    assert_eq!(layout.segment_width(), 300);
    assert_eq!(layout.segment_count(), 11);
    assert_eq!(layout.edge_margin(), 300);
    assert_eq!(layout.total_length(), 3000);
    assert_eq!(layout.wraparound_index(), 10);
}

#[test]
fn test_bin_labels() {
    let bins = default_layout().bins();
    let labels: Vec<String> = bins.iter().map(|bin| bin.label()).collect();

    assert_eq!(bins.len(), 11);
    assert_eq!(labels[0], "0-300");
    assert_eq!(labels[1], "300-600");
    assert_eq!(labels[9], "2700-3000");
    assert_eq!(labels[10], "3000-0");
    assert!(bins[10].is_wraparound);
    assert!(bins[..10].iter().all(|bin| !bin.is_wraparound));
}

#[test]
fn test_reference_scenario() {
    let layout = default_layout();
    let detections = vec![detection(0, 50.0), detection(0, 300.0), detection(2, 305.0)];

    let assignment = layout.assign(&detections);

    assert_eq!(assignment.codes(0), &[0, 0]);
    assert_eq!(assignment.codes(1), &[0, 2]);
    assert_eq!(assignment.codes(10), &[0, 0]);
    for index in 2..10 {
        assert!(assignment.codes(index).is_empty(), "segment {index} should be empty");
    }
    assert_eq!(assignment.dropped(), 0);
}

#[test]
fn test_boundary_counted_in_both_neighbours() {
    let layout = default_layout();
    let assignment = layout.assign(&[detection(4, 1500.0)]);

    assert_eq!(assignment.codes(4), &[4]);
    assert_eq!(assignment.codes(5), &[4]);
    assert!(assignment.codes(10).is_empty());
    assert_eq!(assignment.regular_entry_count(), 2);
}

#[test]
fn test_wraparound_near_far_end() {
    let layout = default_layout();
    let assignment = layout.assign(&[detection(1, 2800.0)]);

    assert_eq!(assignment.codes(9), &[1]);
    assert_eq!(assignment.codes(10), &[1]);
}

#[test]
fn test_wraparound_margin_is_inclusive() {
    let layout = default_layout();

    assert!(layout.in_wraparound(300.0));
    assert!(layout.in_wraparound(2700.0));
    assert!(!layout.in_wraparound(300.5));
    assert!(!layout.in_wraparound(2699.5));
}

#[test]
fn test_beyond_total_length_only_wraps() {
    let layout = default_layout();
    let assignment = layout.assign(&[detection(3, 3200.0), detection(3, -10.0)]);

    assert_eq!(assignment.regular_entry_count(), 0);
    assert_eq!(assignment.codes(10), &[3, 3]);
    assert_eq!(assignment.dropped(), 0);
}

#[test]
fn test_unmatched_detection_is_dropped() {
    let layout = default_layout();
    let assignment = layout.assign(&[detection(3, f64::NAN), detection(1, 450.0)]);

    assert_eq!(assignment.dropped(), 1);
    assert_eq!(assignment.codes(1), &[1]);
    assert!(assignment.codes(10).is_empty());
}

#[test]
fn test_no_inside_detection_is_dropped_from_regular_pass() {
    let layout = default_layout();
    let detections: Vec<Detection> = (0..=30)
        .map(|step| detection(step % 5, f64::from(step) * 100.0 + 0.5))
        .filter(|d| d.x1() <= 3000.0)
        .collect();

    let assignment = layout.assign(&detections);

    // Every x1 sits strictly inside one segment, none on a boundary.
    assert_eq!(assignment.regular_entry_count(), detections.len());
    assert_eq!(assignment.dropped(), 0);
}

#[test]
fn test_empty_input() {
    let assignment = default_layout().assign(&[]);

    assert_eq!(assignment.buckets().len(), 11);
    assert!(assignment
        .buckets()
        .iter()
        .all(|bucket| bucket.class_codes.is_empty()));
    assert_eq!(assignment.dropped(), 0);
}

#[test]
fn test_custom_layout() -> anyhow::Result<()> {
    let layout = SegmentLayout::new(100, 5, 50)?;
    let bins = layout.bins();

    assert_eq!(layout.total_length(), 400);
    assert_eq!(bins.last().map(|bin| bin.label()), Some("400-0".to_string()));

    let assignment = layout.assign(&[detection(0, 60.0), detection(1, 360.0)]);
    assert_eq!(assignment.codes(0), &[0]);
    assert_eq!(assignment.codes(3), &[1]);
    assert_eq!(assignment.codes(4), &[1]);
    Ok(())
}

#[test]
fn test_invalid_layouts() {
    assert_eq!(SegmentLayout::new(0, 11, 300), Err(InvalidLayout::ZeroWidth));
    assert_eq!(
        SegmentLayout::new(300, 1, 300),
        Err(InvalidLayout::TooFewSegments(1))
    );
}
