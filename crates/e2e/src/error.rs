//! Error types for the artifact lifecycle components
//!
//! None of these escape a test scope: each component converts its own
//! failures into a disabled store, a fallback or a no-op.

use std::path::PathBuf;
use thiserror::Error;

/// Why an upload produced no URL
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("uploads are disabled: {0}")]
    Disabled(String),

    #[error("file not found: {0}")]
    MissingFile(PathBuf),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upload timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Backend(String),
}

impl UploadError {
    /// Auth failures disable the store; everything else is per-call
    pub fn is_credentials(&self) -> bool {
        matches!(self, UploadError::Credentials(_))
            || matches!(self, UploadError::Status { status, .. } if *status == 401 || *status == 403)
    }

    /// The store did not answer in time
    pub fn is_timeout(&self) -> bool {
        match self {
            UploadError::Timeout { .. } => true,
            UploadError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Capture start/stop failures
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("recorder failed to start: {0}")]
    Start(String),

    #[error("recorder failed to stop: {0}")]
    Stop(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Report attachment failures
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
