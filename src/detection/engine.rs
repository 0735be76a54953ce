use std::path::Path;

use anyhow::{Context, Result, bail};
use image::{DynamicImage, imageops::FilterType};
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::info;

use crate::config::DetectionConfig;
use crate::detection::Detector;
use crate::detection::preprocessing::BrightnessNormalization;
use crate::error::DetectionError;
use crate::models::{BoundingBox, Detection, DetectionResult};

#[derive(Debug, Clone, Copy)]
pub struct EngineParams {
    pub input_size: u32,
    pub score_threshold: f32,
    pub max_detections: usize,
}

impl From<&DetectionConfig> for EngineParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            input_size: config.input_size,
            score_threshold: config.score_threshold,
            max_detections: config.max_detections,
        }
    }
}

/// Single-stage detector exported to `.rten`. Expects one `[1, 3, S, S]` float input in
/// `0..1` and one `[1, 4 + classes, candidates]` output of centre/size boxes followed by
/// per-class scores.
pub struct RtenDetector {
    model: Model,
    params: EngineParams,
    brightness: BrightnessNormalization,
}

impl RtenDetector {
    pub fn load<P: AsRef<Path>>(path: P, params: EngineParams) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("Detection model not found: {}", path.display());
        }
        if params.input_size == 0 {
            bail!("Detection input size must be positive");
        }
        let model = Model::load_file(path)
            .with_context(|| format!("Failed to load detection model {:?}", path))?;
        info!(model = %path.display(), input_size = params.input_size, "detection model loaded");
        Ok(Self {
            model,
            params,
            brightness: BrightnessNormalization::Off,
        })
    }

    pub fn with_brightness(mut self, brightness: BrightnessNormalization) -> Self {
        self.brightness = brightness;
        self
    }

    fn infer(&self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let size = self.params.input_size;
        let side = size as usize;
        let prepared = self.brightness.apply(img);
        let resized = prepared
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let plane = side * side;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * side + x as usize;
            for channel in 0..3 {
                data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
            }
        }
        let input = NdTensor::from_data([1, 3, side, side], data);

        let output: NdTensor<f32, 3> = self.model.run_one(input.view().into(), None)?.try_into()?;
        let rows = output.size(1);
        let candidates = output.size(2);
        if rows <= 4 {
            bail!("Unexpected model output with {} rows per candidate", rows);
        }

        let sx = f64::from(img.width()) / f64::from(size);
        let sy = f64::from(img.height()) / f64::from(size);

        let mut detections = Vec::new();
        for i in 0..candidates {
            let mut best_class = 0usize;
            let mut best_score = f32::MIN;
            for row in 4..rows {
                let score = output[[0, row, i]];
                if score > best_score {
                    best_class = row - 4;
                    best_score = score;
                }
            }
            if best_score <= self.params.score_threshold {
                continue;
            }

            let cx = f64::from(output[[0, 0, i]]);
            let cy = f64::from(output[[0, 1, i]]);
            let w = f64::from(output[[0, 2, i]]);
            let h = f64::from(output[[0, 3, i]]);
            detections.push(Detection {
                class_code: best_class as u32,
                score: best_score.clamp(0.0, 1.0),
                bbox: BoundingBox {
                    x1: (cx - w / 2.0) * sx,
                    y1: (cy - h / 2.0) * sy,
                    x2: (cx + w / 2.0) * sx,
                    y2: (cy + h / 2.0) * sy,
                },
            });
        }

        detections.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
        detections.truncate(self.params.max_detections);
        Ok(detections)
    }
}

impl Detector for RtenDetector {
    fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let img = image::load_from_memory(image)
            .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;
        let detections = self
            .infer(&img)
            .map_err(|e| DetectionError::ModelUnavailable(format!("{:#}", e)))?;
        Ok(DetectionResult {
            detections,
            image_width: img.width(),
            image_height: img.height(),
        })
    }
}
