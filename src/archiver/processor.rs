use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureResult, StrategyRegistry};
use crate::config::Config;
use crate::db::{
    get_archive, set_archive_done, set_archive_error, set_archive_running, CompletedCapture,
    Database, StoreError,
};
use crate::queue::CaptureTask;

/// Why a `process` call did not end in DONE.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The capture failed; the record is now ERROR with this message.
    #[error("capture failed: {0}")]
    Capture(String),
    /// The record does not exist (never created, or deleted mid-run).
    #[error("archive {0} not found")]
    NotFound(String),
    /// The store could not be read or written.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for ProcessError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<StoreError>() {
            Some(StoreError::NotFound(id)) => Self::NotFound(id.clone()),
            _ => Self::Storage(e),
        }
    }
}

/// Runs one capture task through RUNNING to DONE or ERROR.
pub struct ArchiveProcessor {
    db: Database,
    strategies: StrategyRegistry,
    config: Arc<Config>,
}

impl ArchiveProcessor {
    #[must_use]
    pub fn new(db: Database, strategies: StrategyRegistry, config: Arc<Config>) -> Self {
        Self {
            db,
            strategies,
            config,
        }
    }

    /// Process a task.
    ///
    /// The record goes to RUNNING, the capture runs with no store lock held,
    /// and the outcome is written in a second atomic step. A failure is
    /// recorded on the record and also returned, so the queue can apply its
    /// own retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Capture`] when the record ended in ERROR.
    pub async fn process(&self, task: &CaptureTask) -> Result<(), ProcessError> {
        let pool = self.db.pool();
        let id = task.archive_id.as_str();

        let record = get_archive(pool, id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;

        set_archive_running(pool, id).await?;
        info!(archive_id = %id, kind = %task.kind, url = %task.url, "Processing archive");

        let out_dir = PathBuf::from(&record.out_dir);
        let completed = match self.run_capture(task, &out_dir).await {
            Ok(completed) => completed,
            Err(message) => return self.record_failure(id, message).await,
        };

        match set_archive_done(pool, id, &completed).await {
            Ok(()) => {
                info!(
                    archive_id = %id,
                    title = completed.title.as_deref().unwrap_or(""),
                    "Archive complete"
                );
                Ok(())
            }
            Err(e) => match ProcessError::from(e) {
                ProcessError::Storage(e) => {
                    self.record_failure(id, format!("Failed to save capture result: {e:#}"))
                        .await
                }
                other => Err(other),
            },
        }
    }

    async fn record_failure(&self, id: &str, message: String) -> Result<(), ProcessError> {
        error!(archive_id = %id, "Archive failed: {message}");
        set_archive_error(self.db.pool(), id, &message).await?;
        Err(ProcessError::Capture(message))
    }

    /// Run the strategy and check its result. Errors are the message to record.
    async fn run_capture(&self, task: &CaptureTask, out_dir: &Path) -> Result<CompletedCapture, String> {
        let strategy = self
            .strategies
            .get(task.kind)
            .ok_or_else(|| format!("No capture strategy for kind {}", task.kind))?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| format!("Failed to create {}: {e}", out_dir.display()))?;

        let timeout = self.config.job_timeout;
        let result = match tokio::time::timeout(timeout, strategy.capture(&task.url, out_dir)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(e.message),
            Err(_) => return Err(format!("Capture timed out after {}s", timeout.as_secs())),
        };

        finalize(result, out_dir).await
    }
}

/// Verify artifacts, persist extracted text, and shape the store update.
async fn finalize(result: CaptureResult, out_dir: &Path) -> Result<CompletedCapture, String> {
    let out_dir = tokio::fs::canonicalize(out_dir)
        .await
        .map_err(|e| format!("Output directory unavailable: {e}"))?;

    if !is_file_within(&result.primary_path, &out_dir).await {
        return Err(format!(
            "Primary artifact missing or outside output directory: {}",
            result.primary_path.display()
        ));
    }

    let text_path = match (&result.text_content, &result.text_path) {
        (Some(text), Some(path)) => {
            if !is_within(path, &out_dir).await {
                return Err(format!(
                    "Text path outside output directory: {}",
                    path.display()
                ));
            }
            tokio::fs::write(path, text)
                .await
                .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
            Some(path.clone())
        }
        (None, Some(path)) if is_file_within(path, &out_dir).await => Some(path.clone()),
        (None, Some(path)) => {
            warn!(path = %path.display(), "Ignoring text path with no text and no file");
            None
        }
        (_, None) => None,
    };

    let meta_json = serde_json::to_string(&result.meta)
        .map_err(|e| format!("Failed to serialize metadata: {e}"))?;

    debug!(primary = %result.primary_path.display(), "Capture artifacts verified");

    Ok(CompletedCapture {
        title: result
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        primary_path: result.primary_path.to_string_lossy().to_string(),
        text_path: text_path.map(|p| p.to_string_lossy().to_string()),
        meta_json: Some(meta_json),
        content: result.text_content,
    })
}

async fn is_file_within(path: &Path, dir: &Path) -> bool {
    match tokio::fs::canonicalize(path).await {
        Ok(resolved) => {
            resolved.starts_with(dir)
                && tokio::fs::metadata(&resolved)
                    .await
                    .is_ok_and(|m| m.is_file())
        }
        Err(_) => false,
    }
}

/// Like [`is_file_within`] for a file that may not exist yet: checks its parent.
async fn is_within(path: &Path, dir: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    tokio::fs::canonicalize(parent)
        .await
        .is_ok_and(|resolved| resolved.starts_with(dir))
}
