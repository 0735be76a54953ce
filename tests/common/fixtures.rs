use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use image::{ImageBuffer, ImageFormat, Luma};
use weldscan::core::db::{InspectionDb, NewOwner, Owner};
use weldscan::error::DetectionError;
use weldscan::models::{BoundingBox, Detection, DetectionResult};
use weldscan::report::{DefectCatalog, SegmentLayout};
use weldscan::{DetectionService, Detector, InspectionService, UploadPolicy};

pub const PNG: &str = "image/png";

pub const TEST_CATALOG_TOML: &str = r#"
[names]
"0" = "pora"
"1" = "vkl"
"2" = "podrez"
"3" = "projog"
"4" = "crack"
"#;

/// Encodes a `width` x `height` grayscale gradient as PNG. `seed` varies the content so
/// images with different seeds have different digests.
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Luma([((x + y) as u8).wrapping_add(seed)])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode test PNG");
    bytes
}

pub fn test_catalog() -> DefectCatalog {
    DefectCatalog::from_toml_str(TEST_CATALOG_TOML).expect("test catalog is valid")
}

pub fn default_layout() -> SegmentLayout {
    SegmentLayout::default()
}

pub fn detection(class_code: u32, x1: f64) -> Detection {
    Detection {
        class_code,
        score: 0.9,
        bbox: BoundingBox {
            x1,
            y1: 10.0,
            x2: x1 + 20.0,
            y2: 30.0,
        },
    }
}

pub fn new_owner(full_name: &str) -> NewOwner {
    NewOwner {
        full_name: full_name.to_string(),
        status: "active".to_string(),
        email: "inspector@example.com".to_string(),
    }
}

/// Always answers with the same detections.
#[derive(Debug, Clone, Default)]
pub struct FixedDetector {
    pub detections: Vec<Detection>,
}

impl Detector for FixedDetector {
    fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let img = image::load_from_memory(image)
            .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;
        Ok(DetectionResult {
            detections: self.detections.clone(),
            image_width: img.width(),
            image_height: img.height(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FailingDetector(pub DetectionError);

impl Detector for FailingDetector {
    fn detect(&mut self, _image: &[u8]) -> Result<DetectionResult, DetectionError> {
        Err(self.0.clone())
    }
}

/// Blocks the calling thread for `delay` before answering with no detections.
#[derive(Debug, Clone)]
pub struct SlowDetector {
    pub delay: Duration,
}

impl Detector for SlowDetector {
    fn detect(&mut self, _image: &[u8]) -> Result<DetectionResult, DetectionError> {
        std::thread::sleep(self.delay);
        Ok(DetectionResult {
            detections: Vec::new(),
            image_width: 1,
            image_height: 1,
        })
    }
}

/// Records how many calls overlap; a correctly serialized detector never sees more
/// than one at a time.
#[derive(Debug, Clone, Default)]
pub struct OverlapProbe {
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl Detector for OverlapProbe {
    fn detect(&mut self, _image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(DetectionResult {
            detections: Vec::new(),
            image_width: 1,
            image_height: 1,
        })
    }
}

/// Opens a store in a fresh temporary data directory.
/// Returns both the store and the directory (which must be kept alive).
pub async fn create_test_db() -> (InspectionDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = InspectionDb::open(dir.path().join("data"))
        .await
        .expect("Failed to open test store");
    (db, dir)
}

pub async fn create_test_service<D: Detector + 'static>(
    detector: D,
) -> (InspectionService, tempfile::TempDir) {
    create_test_service_with_timeout(detector, Duration::from_secs(5)).await
}

pub async fn create_test_service_with_timeout<D: Detector + 'static>(
    detector: D,
    timeout: Duration,
) -> (InspectionService, tempfile::TempDir) {
    let (db, dir) = create_test_db().await;
    let service = InspectionService::new(
        db,
        DetectionService::new(detector, timeout),
        Arc::new(test_catalog()),
        default_layout(),
    )
    .with_upload_policy(UploadPolicy::new(PNG, 1024 * 1024));
    (service, dir)
}

pub async fn create_owner_with_image(
    service: &InspectionService,
    full_name: &str,
) -> anyhow::Result<(Owner, String)> {
    let owner = service.create_owner(new_owner(full_name)).await?;
    let outcome = service
        .upload_image(owner.id, PNG, png_bytes(64, 32, 0))
        .await?;
    Ok((owner, outcome.image.filename))
}
