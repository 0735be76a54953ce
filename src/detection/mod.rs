#[cfg(feature = "rten-engine")]
pub mod engine;
pub mod preprocessing;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{debug, warn};

use crate::error::DetectionError;
use crate::models::DetectionResult;

/// A defect detection capability. Implementations need not be thread-safe;
/// [`DetectionService`] serializes calls.
pub trait Detector: Send {
    fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectionError>;
}

/// Stand-in used when no model is configured. Every pass fails explicitly.
#[derive(Debug, Clone, Default)]
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Detector for UnavailableDetector {
    fn detect(&mut self, _image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let reason = if self.reason.is_empty() {
            "no detection model configured"
        } else {
            self.reason.as_str()
        };
        Err(DetectionError::ModelUnavailable(reason.to_string()))
    }
}

/// Shared handle to the single detector instance.
///
/// Inference runs on the blocking pool under a mutex so only one call touches the model
/// at a time. Each call is bounded by `timeout`; a timed-out inference is not cancelled
/// and keeps the mutex until it finishes.
#[derive(Clone)]
pub struct DetectionService {
    detector: Arc<Mutex<Box<dyn Detector>>>,
    timeout: Duration,
}

impl std::fmt::Debug for DetectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionService")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DetectionService {
    pub fn new<D: Detector + 'static>(detector: D, timeout: Duration) -> Self {
        Self::from_boxed(Box::new(detector), timeout)
    }

    pub fn from_boxed(detector: Box<dyn Detector>, timeout: Duration) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn detect(&self, image: Vec<u8>) -> Result<DetectionResult, DetectionError> {
        let detector = Arc::clone(&self.detector);
        let task = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock().map_err(|_| {
                DetectionError::ModelUnavailable("detector poisoned by an earlier panic".into())
            })?;
            detector.detect(&image)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => {
                if let Ok(result) = &result {
                    debug!(
                        detections = result.detections.len(),
                        width = result.image_width,
                        height = result.image_height,
                        "detection pass finished"
                    );
                }
                result
            }
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "detection task aborted");
                Err(DetectionError::ModelUnavailable(format!(
                    "detection task aborted: {}",
                    join_error
                )))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "detection pass timed out");
                Err(DetectionError::Timeout(self.timeout))
            }
        }
    }
}
