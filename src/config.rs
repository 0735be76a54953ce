use std::{path::{Path, PathBuf}, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{InspectionError, Result};
use crate::report::binning::{
    DEFAULT_EDGE_MARGIN, DEFAULT_SEGMENT_COUNT, DEFAULT_SEGMENT_WIDTH, SegmentLayout,
};

pub const DEFAULT_CONFIG_FILE: &str = "weldscan.toml";
pub const ENV_PREFIX: &str = "WELDSCAN_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub binning: BinningConfig,
    pub report: ReportConfig,
    pub upload: UploadConfig,
    pub detection: DetectionConfig,
}

impl AppConfig {
    /// Layer defaults, then the TOML file, then `WELDSCAN_*` environment variables
    /// (nested keys separated by `__`, e.g. `WELDSCAN_BINNING__SEGMENT_WIDTH`).
    ///
    /// An explicitly requested file must exist; the default `weldscan.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        let figment = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(InspectionError::InvalidConfig(format!(
                        "config file {:?} does not exist",
                        path
                    )));
                }
                figment.merge(Toml::file(path))
            }
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.binning.layout()?;
        if self.upload.max_bytes == 0 {
            return Err(InspectionError::InvalidConfig(
                "upload.max_bytes must be positive".into(),
            ));
        }
        if self.detection.timeout_secs == 0 {
            return Err(InspectionError::InvalidConfig(
                "detection.timeout_secs must be positive".into(),
            ));
        }
        if self.detection.brightness == BrightnessMode::Match
            && self.detection.brightness_reference.is_none()
        {
            return Err(InspectionError::InvalidConfig(
                "detection.brightness = \"match\" needs detection.brightness_reference".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/catalog.toml"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    pub segment_width: u32,
    pub segment_count: u32,
    pub edge_margin: u32,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            segment_width: DEFAULT_SEGMENT_WIDTH,
            segment_count: DEFAULT_SEGMENT_COUNT,
            edge_margin: DEFAULT_EDGE_MARGIN,
        }
    }
}

impl BinningConfig {
    pub fn layout(&self) -> Result<SegmentLayout> {
        SegmentLayout::new(self.segment_width, self.segment_count, self.edge_margin)
            .map_err(|e| InspectionError::InvalidConfig(e.to_string()))
    }
}

/// Fixed, regulated report metadata. None of it is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub standard: String,
    pub report_number: String,
    pub report_date: String,
    pub intro_lines: Vec<String>,
    pub results_heading: String,
    pub joint_id: String,
    pub pipe_size: String,
    pub welder_stamp: String,
    pub sensitivity: String,
    pub not_applicable: String,
    pub conclusion: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            standard: "СП 392.1325800.2018".into(),
            report_number: "100-400-ЛС".into(),
            report_date: "01.03.2021".into(),
            intro_lines: vec![
                "по результатам контроля качества сварных соединений радиографическим методом".into(),
                "Тип источника ионизирующего излучения: рентгеновский дефектоскоп непрерывного действия".into(),
                "Номер операционной технологической карты контроля: ТК-РК-ЦР-С-1020x17П-00890001".into(),
            ],
            results_heading: "РЕЗУЛЬТАТЫ КОНТРОЛЯ".into(),
            joint_id: "100-400-ЛС".into(),
            pipe_size: "1020x17".into(),
            welder_stamp: "1CE91939".into(),
            sensitivity: "0,50".into(),
            not_applicable: "н/п".into(),
            conclusion: "годен".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub content_type: String,
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            content_type: "image/png".into(),
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// `.rten` model file. Without one every detection pass fails as "model unavailable".
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub score_threshold: f32,
    pub max_detections: usize,
    pub timeout_secs: u64,
    pub brightness: BrightnessMode,
    /// Reference exposure for `brightness = "match"`.
    pub brightness_reference: Option<PathBuf>,
}

/// Histogram brightness correction before inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMode {
    #[default]
    Off,
    Equalize,
    Match,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: 640,
            score_threshold: 0.35,
            max_detections: 100,
            timeout_secs: 60,
            brightness: BrightnessMode::Off,
            brightness_reference: None,
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
