use std::path::Path;

use anyhow::{Context, bail};
use image::{DynamicImage, GrayImage};
use imageproc::contrast::{equalize_histogram, match_histogram};

use crate::config::{BrightnessMode, DetectionConfig};

/// Brightness correction applied to every radiograph before inference.
#[derive(Debug, Clone, Default)]
pub enum BrightnessNormalization {
    #[default]
    Off,
    /// Spread the histogram over the full intensity range.
    Equalize,
    /// Match the histogram of a reference exposure.
    Match(GrayImage),
}

impl BrightnessNormalization {
    /// Resolve the configured mode, loading the reference image for `match`.
    pub fn from_config(config: &DetectionConfig) -> anyhow::Result<Self> {
        match config.brightness {
            BrightnessMode::Off => Ok(Self::Off),
            BrightnessMode::Equalize => Ok(Self::Equalize),
            BrightnessMode::Match => match &config.brightness_reference {
                Some(path) => Ok(Self::Match(load_reference(path)?)),
                None => bail!("Brightness matching needs detection.brightness_reference"),
            },
        }
    }

    /// Normalized grayscale copy of `img`, or `img` unchanged when off.
    pub fn apply(&self, img: &DynamicImage) -> DynamicImage {
        match self {
            Self::Off => img.clone(),
            Self::Equalize => DynamicImage::ImageLuma8(equalize_histogram(&img.to_luma8())),
            Self::Match(reference) => {
                DynamicImage::ImageLuma8(match_histogram(&img.to_luma8(), reference))
            }
        }
    }
}

/// Load the reference exposure as grayscale.
pub fn load_reference<P: AsRef<Path>>(path: P) -> anyhow::Result<GrayImage> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("Failed to open brightness reference {:?}", path))?;
    Ok(img.to_luma8())
}
