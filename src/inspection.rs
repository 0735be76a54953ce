//! Inspection record lifecycle: uploads, detection passes, operator annotation and report
//! generation for every owner.
//!
//! Image states move `Uploaded -> Detected | DetectionFailed -> (Annotated ->
//! ReportGenerated)*`. Mutations of one owner's record are serialized by a per-owner lock
//! and each store mutation runs in its own transaction. Detection runs outside the lock so
//! a slow pass never blocks other writes; its result is only recorded if the image is
//! still at the version the pass was computed for.

use std::{
    collections::HashMap,
    io::Cursor,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use image::{ImageFormat, ImageReader};
use time::{OffsetDateTime, macros::format_description};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ReportConfig, UploadConfig};
use crate::core::db::{
    ImageReplacement, ImageRepository, InspectionDb, InspectionImage, InspectionReport,
    NewImage, NewOwner, NewReport, Owner, OwnerRepository, RecordOutcome, ReportRepository,
};
use crate::detection::DetectionService;
use crate::error::{DetectionError, InspectionError, Result, UploadRejected};
use crate::models::{Detection, DetectionResult, DetectionSource};
use crate::report::{
    DefectCatalog, DocumentRenderer, HtmlRenderer, ReportComposer, SegmentLayout,
    SegmentSummary, StyleSheet, parse_defect_rects, summarize_detections,
};

const MAX_SLUG_CHARS: usize = 48;

/// Accepted upload format and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    content_type: String,
    max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self::new(config.content_type.clone(), config.max_bytes)
    }
}

impl UploadPolicy {
    pub fn new(content_type: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            content_type: content_type.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate an upload and return its pixel dimensions.
    pub fn check(
        &self,
        content_type: &str,
        bytes: &[u8],
    ) -> std::result::Result<(u32, u32), UploadRejected> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if !essence.eq_ignore_ascii_case(&self.content_type) {
            return Err(UploadRejected::UnsupportedContentType {
                actual: content_type.to_string(),
                expected: self.content_type.clone(),
            });
        }
        if bytes.is_empty() {
            return Err(UploadRejected::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadRejected::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let reader = match ImageFormat::from_mime_type(&self.content_type) {
            Some(format) => ImageReader::with_format(Cursor::new(bytes), format),
            None => ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .map_err(|e| UploadRejected::Undecodable(e.to_string()))?,
        };
        reader
            .into_dimensions()
            .map_err(|e| UploadRejected::Undecodable(e.to_string()))
    }
}

/// What happened to the detection pass started by an upload or re-detect.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionStatus {
    Completed { detections: usize },
    /// Recorded on the image as "no detections available".
    Failed(DetectionError),
    /// The image was replaced while the pass ran; the result was dropped.
    Discarded { current_version: i64 },
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub image: InspectionImage,
    pub detection: DetectionStatus,
}

#[derive(Debug, Clone)]
pub struct AnnotationOutcome {
    pub image: InspectionImage,
    pub report: InspectionReport,
    /// `false` when the submitted image was identical to the stored one and the existing
    /// version's report was regenerated.
    pub new_version: bool,
}

#[derive(Debug, Default)]
struct OwnerLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl OwnerLocks {
    async fn acquire(&self, owner_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(owner_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the owner's entry unless another task still holds or waits for it.
    fn forget(&self, owner_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&owner_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&owner_id);
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct InspectionService {
    db: InspectionDb,
    detection: DetectionService,
    catalog: Arc<DefectCatalog>,
    layout: SegmentLayout,
    report_config: ReportConfig,
    style: StyleSheet,
    renderer: Arc<dyn DocumentRenderer>,
    upload: UploadPolicy,
    locks: OwnerLocks,
}

impl std::fmt::Debug for InspectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectionService")
            .field("db", &self.db)
            .field("detection", &self.detection)
            .field("layout", &self.layout)
            .field("upload", &self.upload)
            .finish()
    }
}

impl InspectionService {
    pub fn new(
        db: InspectionDb,
        detection: DetectionService,
        catalog: Arc<DefectCatalog>,
        layout: SegmentLayout,
    ) -> Self {
        Self {
            db,
            detection,
            catalog,
            layout,
            report_config: ReportConfig::default(),
            style: StyleSheet::default(),
            renderer: Arc::new(HtmlRenderer),
            upload: UploadPolicy::default(),
            locks: OwnerLocks::default(),
        }
    }

    /// Load the catalog, open the store and wire everything from `config`.
    pub async fn from_config(config: &AppConfig, detection: DetectionService) -> Result<Self> {
        let catalog = DefectCatalog::load(&config.catalog.path)?;
        info!(classes = catalog.len(), path = %config.catalog.path.display(), "defect catalog loaded");
        let layout = config.binning.layout()?;
        let db = InspectionDb::open(&config.storage.data_dir).await?;
        Ok(Self::new(db, detection, Arc::new(catalog), layout)
            .with_report_config(config.report.clone())
            .with_upload_policy(UploadPolicy::from(&config.upload)))
    }

    pub fn with_report_config(mut self, report_config: ReportConfig) -> Self {
        self.report_config = report_config;
        self
    }

    pub fn with_style(mut self, style: StyleSheet) -> Self {
        self.style = style;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_upload_policy(mut self, upload: UploadPolicy) -> Self {
        self.upload = upload;
        self
    }

    pub fn db(&self) -> &InspectionDb {
        &self.db
    }

    pub fn catalog(&self) -> &DefectCatalog {
        &self.catalog
    }

    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Number of owners with a tracked mutation lock.
    pub fn owner_lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Take the owner's mutation lock and load the owner under it. An unknown owner
    /// leaves no lock entry behind.
    async fn lock_owner(&self, owner_id: i64) -> Result<(OwnedMutexGuard<()>, Owner)> {
        let guard = self.locks.acquire(owner_id).await;
        match self.db.get_owner(owner_id).await {
            Ok(owner) => Ok((guard, owner)),
            Err(err) => {
                drop(guard);
                if err.is_not_found() {
                    self.locks.forget(owner_id);
                }
                Err(err)
            }
        }
    }

    pub async fn create_owner(&self, owner: NewOwner) -> Result<Owner> {
        self.db.create_owner(owner).await
    }

    pub async fn list_owners(&self) -> Result<Vec<Owner>> {
        self.db.list_owners().await
    }

    pub async fn get_owner(&self, owner_id: i64) -> Result<Owner> {
        self.db.get_owner(owner_id).await
    }

    pub async fn delete_owner(&self, owner_id: i64) -> Result<()> {
        let result = {
            let _guard = self.locks.acquire(owner_id).await;
            self.db.delete_owner(owner_id).await
        };
        self.locks.forget(owner_id);
        result
    }

    pub async fn list_images(&self, owner_id: i64) -> Result<Vec<InspectionImage>> {
        self.db.get_owner(owner_id).await?;
        self.db.list_images(owner_id).await
    }

    pub async fn get_image(&self, owner_id: i64, filename: &str) -> Result<InspectionImage> {
        self.db.get_image(owner_id, filename).await
    }

    /// Store a new image for the owner and run a detection pass on it.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_image(
        &self,
        owner_id: i64,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome> {
        let (width, height) = self.upload.check(content_type, &bytes)?;
        let image = {
            let (_guard, owner) = self.lock_owner(owner_id).await?;
            let filename = image_filename(&owner.full_name)?;
            self.db
                .add_image(NewImage {
                    owner_id,
                    filename,
                    bytes: bytes.clone(),
                    width,
                    height,
                })
                .await?
        };

        let detection = self.run_detection(&image, bytes).await?;
        let image = self.db.get_image_by_id(image.id).await?;
        Ok(UploadOutcome { image, detection })
    }

    /// Run a fresh detection pass on the image's current version.
    #[instrument(skip(self))]
    pub async fn redetect(&self, owner_id: i64, filename: &str) -> Result<UploadOutcome> {
        self.db.get_owner(owner_id).await?;
        let image = self.db.get_image(owner_id, filename).await?;
        let bytes = self.db.read_image(&image.filename).await?;
        let detection = self.run_detection(&image, bytes).await?;
        let image = self.db.get_image_by_id(image.id).await?;
        Ok(UploadOutcome { image, detection })
    }

    async fn run_detection(&self, image: &InspectionImage, bytes: Vec<u8>) -> Result<DetectionStatus> {
        let outcome = self.detection.detect(bytes).await;
        let status = match &outcome {
            Ok(result) => DetectionStatus::Completed {
                detections: result.detections.len(),
            },
            Err(err) => {
                warn!(image_id = image.id, version = image.version, error = %err, "detection failed");
                DetectionStatus::Failed(err.clone())
            }
        };
        match self
            .db
            .record_detection(image.id, image.version, outcome)
            .await?
        {
            RecordOutcome::Recorded => Ok(status),
            RecordOutcome::Discarded { current_version } => {
                Ok(DetectionStatus::Discarded { current_version })
            }
        }
    }

    /// Replace an image with the operator's version and generate the report for it from
    /// the submitted defect rectangles.
    ///
    /// The rectangles are parsed before anything is touched, so a malformed payload
    /// leaves the image and its earlier reports unchanged.
    #[instrument(skip(self, bytes, defects_data), fields(size = bytes.len()))]
    pub async fn annotate_image(
        &self,
        owner_id: i64,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
        defects_data: &str,
    ) -> Result<AnnotationOutcome> {
        let annotations = parse_defect_rects(defects_data)?;
        let (width, height) = self.upload.check(content_type, &bytes)?;

        let (_guard, _owner) = self.lock_owner(owner_id).await?;
        let image = self.db.get_image(owner_id, filename).await?;

        let segments = self.summarize(&annotations);
        let document = ReportComposer::new(&self.report_config).compose(&segments);
        let rendered = self.renderer.render(&document, &self.style)?;

        let replaced = self
            .db
            .replace_image(
                image.id,
                ImageReplacement {
                    bytes,
                    width,
                    height,
                    annotations,
                },
            )
            .await?;
        let version = replaced.image.version;

        let report = self
            .db
            .save_report(NewReport {
                owner_id,
                image_id: image.id,
                image_version: version,
                filename: report_filename(&image.filename, version, self.renderer.extension()),
                segments,
                bytes: rendered,
            })
            .await?;
        let image = self.db.get_image_by_id(image.id).await?;
        Ok(AnnotationOutcome {
            image,
            report,
            new_version: replaced.new_version,
        })
    }

    /// Per-segment defect summaries for a set of detections.
    pub fn summarize(&self, detections: &[Detection]) -> Vec<SegmentSummary> {
        summarize_detections(detections, &self.layout, &self.catalog)
    }

    /// Model detections for the image's current version, `None` if no successful pass
    /// has been recorded for it.
    pub async fn get_detections(
        &self,
        owner_id: i64,
        filename: &str,
    ) -> Result<Option<DetectionResult>> {
        Ok(self.db.get_image(owner_id, filename).await?.detection_result())
    }

    /// Operator rectangles submitted for the image's current version.
    pub async fn get_annotations(&self, owner_id: i64, filename: &str) -> Result<Vec<Detection>> {
        let image = self.db.get_image(owner_id, filename).await?;
        self.db
            .get_detections(image.id, image.version, DetectionSource::Operator)
            .await
    }

    pub async fn read_image(&self, owner_id: i64, filename: &str) -> Result<Vec<u8>> {
        let image = self.db.get_image(owner_id, filename).await?;
        self.db.read_image(&image.filename).await
    }

    pub async fn list_reports(&self, owner_id: i64) -> Result<Vec<InspectionReport>> {
        self.db.get_owner(owner_id).await?;
        self.db.list_reports(owner_id).await
    }

    pub async fn read_report(&self, owner_id: i64, filename: &str) -> Result<Vec<u8>> {
        let report = self.db.get_report(filename).await?;
        if report.owner_id != owner_id {
            return Err(InspectionError::ArtifactNotFound(filename.to_string()));
        }
        self.db.read_report(&report.filename).await
    }

    pub fn report_content_type(&self) -> &'static str {
        self.renderer.content_type()
    }
}

/// `<name slug>_<utc timestamp>_<random>.png`
fn image_filename(full_name: &str) -> Result<String> {
    let mut slug = String::new();
    for ch in full_name.chars().take(MAX_SLUG_CHARS) {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = match slug.trim_end_matches('_') {
        "" => "owner",
        slug => slug,
    };

    let stamp = OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day]T[hour][minute][second]"))
        .map_err(|e| InspectionError::Corrupt(format!("failed to format timestamp: {}", e)))?;
    let suffix = Uuid::new_v4().simple().to_string();
    Ok(format!("{}_{}_{}.png", slug, stamp, &suffix[..8]))
}

pub fn report_filename(image_filename: &str, version: i64, extension: &str) -> String {
    let stem = Path::new(image_filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(image_filename);
    format!("{}_v{}.{}", stem, version, extension)
}
