use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{ArchiveKind, Metadata};

/// Normalized output of a capture strategy.
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    /// Human-readable title, if one was found.
    pub title: Option<String>,
    /// The single canonical artifact. Must exist when the result is returned.
    pub primary_path: PathBuf,
    /// Structured facts about the capture.
    pub meta: Metadata,
    /// Extracted text. Persisted by the processor, not by the strategy.
    pub text_content: Option<String>,
    /// Where `text_content` should be written.
    pub text_path: Option<PathBuf>,
}

/// A failed capture, carrying one descriptive message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CaptureError {
    pub message: String,
}

impl CaptureError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for CaptureError {
    fn from(e: anyhow::Error) -> Self {
        // Alternate formatting keeps the whole context chain in one line.
        Self::new(format!("{e:#}"))
    }
}

/// A procedure that turns a URL into artifacts for one kind.
#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    /// The kind this strategy captures.
    fn kind(&self) -> ArchiveKind;

    /// Capture `url` into `out_dir`.
    ///
    /// `out_dir` may already hold artifacts from an earlier run; they are
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] describing why the capture failed. Partial
    /// artifacts may be left behind.
    async fn capture(&self, url: &str, out_dir: &Path) -> Result<CaptureResult, CaptureError>;
}
