use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Fatal at startup: the defect catalog could not be read or validated.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("failed to read defect catalog {path:?}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed defect catalog: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("detection model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("detection timed out after {0:?}")]
    Timeout(Duration),
}

/// The operator's defect rectangle payload is not a list of `{x1, className}` records.
#[derive(Debug, Error)]
#[error("malformed defect input: {reason}")]
pub struct MalformedDefectInputError {
    pub reason: String,
}

impl MalformedDefectInputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to format report document")]
    Format(#[from] std::fmt::Error),
    #[error("report document has no table")]
    MissingTable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadRejected {
    #[error("unsupported content type {actual:?}, only {expected:?} is accepted")]
    UnsupportedContentType { actual: String, expected: String },
    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("empty payload")]
    Empty,
    #[error("payload is not a decodable image: {0}")]
    Undecodable(String),
}

#[derive(Debug, Error)]
pub enum InspectionError {
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    MalformedDefectInput(#[from] MalformedDefectInputError),
    #[error(transparent)]
    Upload(#[from] UploadRejected),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("record {0} not found")]
    RecordNotFound(i64),
    #[error("image {0} not found")]
    ImageNotFound(i64),
    #[error("artifact {0:?} not found")]
    ArtifactNotFound(String),
    #[error("failed to write artifact {path:?}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to load configuration")]
    Config(#[from] Box<figment::Error>),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl InspectionError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            InspectionError::RecordNotFound(_)
                | InspectionError::ImageNotFound(_)
                | InspectionError::ArtifactNotFound(_)
        )
    }
}

impl From<figment::Error> for InspectionError {
    fn from(err: figment::Error) -> Self {
        InspectionError::Config(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, InspectionError>;
