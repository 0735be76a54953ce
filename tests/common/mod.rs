#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from weldscan for tests
pub use weldscan::core::db::{
    ArtifactKind, ImageReplacement, ImageRepository, ImageState, InspectionDb, InspectionImage,
    InspectionReport, NewImage, NewOwner, NewReport, Owner, OwnerRepository, RecordOutcome,
    ReportRepository,
};
pub use weldscan::error::{DetectionError, InspectionError, UploadRejected};
pub use weldscan::models::{Detection, DetectionResult, DetectionSource};
pub use weldscan::report::{DefectCatalog, SegmentLayout, SegmentSummary};
pub use weldscan::{DetectionService, DetectionStatus, InspectionService, UploadPolicy};
