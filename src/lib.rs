pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod inspection;
pub mod models;
pub mod report;

pub use config::AppConfig;
pub use detection::{DetectionService, Detector, UnavailableDetector};
pub use error::{InspectionError, Result};
pub use inspection::{AnnotationOutcome, DetectionStatus, InspectionService, UploadOutcome, UploadPolicy};
pub use models::{BoundingBox, Detection, DetectionResult, DetectionSource};
