use std::future::Future;

use time::OffsetDateTime;

use crate::error::{DetectionError, InspectionError, Result};
use crate::models::{BoundingBox, Detection, DetectionResult, DetectionSource};

/// Where an image is in its inspection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Uploaded,
    Detected,
    DetectionFailed,
    Annotated,
    ReportGenerated,
}

#[derive(Debug, Clone)]
pub struct InspectionImage {
    pub id: i64,
    pub owner_id: i64,
    pub position: i64,
    pub filename: String,
    pub version: i64,
    /// Hex SHA-256 of the current content.
    pub digest: String,
    pub state: ImageState,
    pub detection_error: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Model detections for the current version. `None` until a detection pass for this
    /// version has succeeded.
    pub detections: Option<Vec<Detection>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub(super) _guard: (),
}

impl InspectionImage {
    pub fn detection_result(&self) -> Option<DetectionResult> {
        self.detections.as_ref().map(|detections| DetectionResult {
            detections: detections.clone(),
            image_width: self.width,
            image_height: self.height,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub owner_id: i64,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// New content for an existing image together with the operator's defect rectangles.
#[derive(Debug, Clone)]
pub struct ImageReplacement {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub annotations: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct ReplacedImage {
    pub image: InspectionImage,
    /// `false` when the replacement carried the same content as the stored version.
    pub new_version: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The image moved on to a newer version while the pass was running.
    Discarded { current_version: i64 },
}

pub trait ImageRepository {
    fn add_image(&self, image: NewImage) -> impl Future<Output = Result<InspectionImage>>;
    fn get_image(
        &self,
        owner_id: i64,
        filename: &str,
    ) -> impl Future<Output = Result<InspectionImage>>;
    fn get_image_by_id(&self, id: i64) -> impl Future<Output = Result<InspectionImage>>;
    fn list_images(&self, owner_id: i64) -> impl Future<Output = Result<Vec<InspectionImage>>>;
    /// Store the outcome of a detection pass computed for `version`.
    fn record_detection(
        &self,
        image_id: i64,
        version: i64,
        outcome: std::result::Result<DetectionResult, DetectionError>,
    ) -> impl Future<Output = Result<RecordOutcome>>;
    fn replace_image(
        &self,
        image_id: i64,
        replacement: ImageReplacement,
    ) -> impl Future<Output = Result<ReplacedImage>>;
    fn get_detections(
        &self,
        image_id: i64,
        version: i64,
        source: DetectionSource,
    ) -> impl Future<Output = Result<Vec<Detection>>>;
    fn read_image(&self, filename: &str) -> impl Future<Output = Result<Vec<u8>>>;
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ImageRow {
    pub id: i64,
    pub owner_id: i64,
    pub position: i64,
    pub filename: String,
    pub version: i64,
    pub sha256: String,
    pub state: i64,
    pub detected_version: Option<i64>,
    pub detection_error: Option<String>,
    pub width: i64,
    pub height: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub(super) const IMAGE_COLUMNS: &str = "id, owner_id, position, filename, version, sha256, state, \
     detected_version, detection_error, width, height, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(super) struct DetectionRow {
    pub class_code: i64,
    pub score: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl TryFrom<DetectionRow> for Detection {
    type Error = InspectionError;

    fn try_from(row: DetectionRow) -> Result<Self> {
        let class_code = u32::try_from(row.class_code)
            .map_err(|_| InspectionError::Corrupt(format!("class code {}", row.class_code)))?;
        Ok(Detection {
            class_code,
            score: row.score as f32,
            bbox: BoundingBox {
                x1: row.x1,
                y1: row.y1,
                x2: row.x2,
                y2: row.y2,
            },
        })
    }
}

impl TryFrom<i64> for ImageState {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ImageState::Uploaded),
            1 => Ok(ImageState::Detected),
            2 => Ok(ImageState::DetectionFailed),
            3 => Ok(ImageState::Annotated),
            4 => Ok(ImageState::ReportGenerated),
            _ => Err(anyhow::anyhow!("Invalid ImageState value: {}", value)),
        }
    }
}

impl From<ImageState> for i64 {
    fn from(state: ImageState) -> Self {
        match state {
            ImageState::Uploaded => 0,
            ImageState::Detected => 1,
            ImageState::DetectionFailed => 2,
            ImageState::Annotated => 3,
            ImageState::ReportGenerated => 4,
        }
    }
}
