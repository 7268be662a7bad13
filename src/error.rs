//! Error types for the capture pipeline

use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing, paginating or writing a report
#[derive(Error, Debug)]
pub enum Error {
    /// The sandbox did not finish loading within the configured threshold
    #[error("Sandbox load timed out after {0}ms")]
    SandboxLoadTimeout(u64),

    /// The sandbox document could not be inspected (e.g. cross-origin assets)
    #[error("Sandbox access denied: {0}")]
    SandboxAccessDenied(String),

    /// Rasterizing or compositing a chunk failed
    #[error("Capture failed: {0}")]
    CaptureFailure(String),

    /// One or more section fetches failed.
    ///
    /// `outcomes` maps every requested section to `"ok"` or the failure text.
    #[error("Content fetch failed for sections: {}", .failed.join(", "))]
    ContentFetchFailure {
        failed: Vec<String>,
        outcomes: BTreeMap<String, String>,
    },

    /// The run was cancelled by the caller
    #[error("Export cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error talking to the content store
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Building or saving the output document failed
    #[error("Document error: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures that only disable the image-capture half of a run.
    pub fn is_capture_stage(&self) -> bool {
        matches!(
            self,
            Error::SandboxLoadTimeout(_) | Error::SandboxAccessDenied(_) | Error::CaptureFailure(_)
        )
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::Document(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Document(format!("image encoding failed: {}", err))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}
