use serde::Deserialize;

use crate::error::MalformedDefectInputError;
use crate::models::{BoundingBox, Detection};

/// Operator-drawn rectangle. Only `x1` and `className` are required; the remaining box
/// corners default to a degenerate box at `x1`.
#[derive(Debug, Deserialize)]
struct RawRect {
    x1: f64,
    #[serde(default)]
    y1: Option<f64>,
    #[serde(default)]
    x2: Option<f64>,
    #[serde(default)]
    y2: Option<f64>,
    #[serde(rename = "className")]
    class_name: ClassName,
    #[serde(default)]
    score: Option<f32>,
}

/// Clients send the class either as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassName {
    Code(u32),
    Float(f64),
    Text(String),
}

impl ClassName {
    fn to_code(&self, index: usize) -> Result<u32, MalformedDefectInputError> {
        match self {
            ClassName::Code(code) => Ok(*code),
            ClassName::Float(value)
                if value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(value) =>
            {
                Ok(*value as u32)
            }
            ClassName::Float(value) => Err(MalformedDefectInputError::new(format!(
                "rectangle {}: className {} is not a class code",
                index, value
            ))),
            ClassName::Text(text) => text.trim().parse().map_err(|_| {
                MalformedDefectInputError::new(format!(
                    "rectangle {}: className {:?} is not a class code",
                    index, text
                ))
            }),
        }
    }
}

/// Parse the `defects_data` payload submitted with a replace/annotate action into
/// operator detections. Anything other than a JSON list of `{x1, className}` records is
/// rejected as a whole.
pub fn parse_defect_rects(input: &str) -> Result<Vec<Detection>, MalformedDefectInputError> {
    let raw: Vec<RawRect> = serde_json::from_str(input)
        .map_err(|e| MalformedDefectInputError::new(e.to_string()))?;

    raw.iter()
        .enumerate()
        .map(|(index, rect)| {
            let class_code = rect.class_name.to_code(index)?;
            let y1 = rect.y1.unwrap_or(0.0);
            Ok(Detection {
                class_code,
                score: rect.score.unwrap_or(1.0).clamp(0.0, 1.0),
                bbox: BoundingBox {
                    x1: rect.x1,
                    y1,
                    x2: rect.x2.unwrap_or(rect.x1),
                    y2: rect.y2.unwrap_or(y1),
                },
            })
        })
        .collect()
}
