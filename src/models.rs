use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Who asserted a detection: the model, or an operator annotating the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Model,
    Operator,
}

impl TryFrom<i64> for DetectionSource {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DetectionSource::Model),
            1 => Ok(DetectionSource::Operator),
            _ => Err(anyhow::anyhow!("Invalid DetectionSource value: {}", value)),
        }
    }
}

impl From<DetectionSource> for i64 {
    fn from(source: DetectionSource) -> Self {
        match source {
            DetectionSource::Model => 0,
            DetectionSource::Operator => 1,
        }
    }
}

/// One defect instance. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_code: u32,
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Horizontal start coordinate, the only spatial key used for segment binning.
    pub fn x1(&self) -> f64 {
        self.bbox.x1
    }
}

/// Typed output of one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub image_width: u32,
    pub image_height: u32,
}
