//! Submission, query and retrieval operations shared by the HTTP layer.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::archiver::download_filename;
use crate::capture::select_kind;
use crate::config::Config;
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::db::{
    count_archives_by_status, delete_archive, get_archive, list_archives, ArchiveFilter,
    ArchiveKind, ArchiveRecord, ArchiveStatus, Database, QueueStats,
};
use crate::queue::{CaptureTask, JobQueue};

const THROTTLE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    StorageDrift(String),
    #[error("too many submissions, limit is {0} per minute")]
    RateLimited(u32),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Returned by submission and re-processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    pub status: String,
    pub kind: String,
    pub url: String,
}

/// A record plus its parsed metadata (`null` when absent or malformed).
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveDetail {
    #[serde(flatten)]
    pub record: ArchiveRecord,
    pub meta: Option<serde_json::Value>,
}

/// List/search parameters as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub q: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A primary artifact ready to stream.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub queue: QueueStats,
    pub archives: BTreeMap<String, i64>,
}

/// Sliding one-minute window over accepted submissions.
#[derive(Debug)]
pub struct SubmissionThrottle {
    max_per_minute: u32,
    accepted: Mutex<VecDeque<Instant>>,
}

impl SubmissionThrottle {
    /// `0` disables throttling.
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            accepted: Mutex::new(VecDeque::new()),
        }
    }

    /// Count one submission, failing if the window is full.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::RateLimited`] when over the limit.
    pub fn check(&self) -> Result<(), ServiceError> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Result<(), ServiceError> {
        if self.max_per_minute == 0 {
            return Ok(());
        }

        let mut accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);
        while accepted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= THROTTLE_WINDOW)
        {
            accepted.pop_front();
        }

        if accepted.len() >= self.max_per_minute as usize {
            return Err(ServiceError::RateLimited(self.max_per_minute));
        }
        accepted.push_back(now);
        Ok(())
    }
}

/// New archive id: 32 lowercase hex characters.
#[must_use]
pub fn new_archive_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Submission and retrieval façade over the store, the queue and the artifact tree.
#[derive(Debug, Clone)]
pub struct ArchiveService {
    db: Database,
    queue: JobQueue,
    config: Arc<Config>,
    throttle: Arc<SubmissionThrottle>,
}

impl ArchiveService {
    #[must_use]
    pub fn new(db: Database, queue: JobQueue, config: Arc<Config>) -> Self {
        let throttle = Arc::new(SubmissionThrottle::new(config.max_jobs_per_minute));
        Self {
            db,
            queue,
            config,
            throttle,
        }
    }

    /// Validate, create a QUEUED record, and enqueue its capture.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a bad URL or kind; nothing is created.
    pub async fn submit(&self, url: &str, kind: Option<&str>) -> Result<Submission, ServiceError> {
        let url = validate_url(url)?;
        let explicit = parse_kind(kind)?;
        self.throttle.check()?;

        let kind = select_kind(&url, explicit);
        let id = new_archive_id();
        let out_dir = self.config.out_dir_for(&id);

        let record = self
            .queue
            .enqueue_new(
                &CaptureTask {
                    archive_id: id.clone(),
                    url: url.clone(),
                    kind,
                },
                &out_dir.to_string_lossy(),
            )
            .await?;

        info!(archive_id = %id, kind = %kind, url = %url, "Archive submitted");

        Ok(Submission {
            id,
            status: record.status,
            kind: kind.to_string(),
            url,
        })
    }

    /// Get one record with its parsed metadata.
    pub async fn get(&self, id: &str) -> Result<ArchiveDetail, ServiceError> {
        let record = self.find(id).await?;
        let meta = record.metadata();
        Ok(ArchiveDetail { record, meta })
    }

    /// List or search records, newest first.
    pub async fn list(&self, params: &ListParams) -> Result<Vec<ArchiveRecord>, ServiceError> {
        let status = match params.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(ArchiveStatus::parse(s).ok_or_else(|| {
                ServiceError::Validation(format!("unknown status '{s}'"))
            })?),
        };

        let filter = ArchiveFilter {
            status,
            query: params
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from),
            limit: clamp_limit(params.limit),
            offset: params.offset.unwrap_or(0).max(0),
        };

        Ok(list_archives(self.db.pool(), &filter).await?)
    }

    /// Enqueue another capture of an existing record.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Conflict`] while the record is RUNNING.
    pub async fn reprocess(&self, id: &str) -> Result<Submission, ServiceError> {
        let record = self.find(id).await?;

        if record.status_enum() == Some(ArchiveStatus::Running) {
            return Err(ServiceError::Conflict(format!(
                "archive {id} is currently running"
            )));
        }
        self.throttle.check()?;

        let kind = record
            .kind_enum()
            .unwrap_or_else(|| select_kind(&record.url, None));
        self.queue
            .enqueue(&CaptureTask {
                archive_id: record.id.clone(),
                url: record.url.clone(),
                kind,
            })
            .await?;

        info!(archive_id = %id, kind = %kind, "Archive re-enqueued");

        Ok(Submission {
            id: record.id,
            status: record.status,
            kind: kind.to_string(),
            url: record.url,
        })
    }

    /// Locate the primary artifact of a DONE record.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for unknown or unfinished records,
    /// [`ServiceError::StorageDrift`] when the file is gone from disk.
    pub async fn download(&self, id: &str) -> Result<ArtifactDownload, ServiceError> {
        let record = self.find(id).await?;

        let primary = match (&record.primary_path, record.status_enum()) {
            (Some(path), Some(ArchiveStatus::Done)) => PathBuf::from(path),
            _ => return Err(ServiceError::NotFound("file not ready".to_string())),
        };

        let metadata = match tokio::fs::metadata(&primary).await {
            Ok(m) if m.is_file() => m,
            _ => {
                warn!(archive_id = %id, path = %primary.display(), "Primary artifact missing on disk");
                return Err(ServiceError::StorageDrift(format!(
                    "artifact for archive {id} is missing from storage"
                )));
            }
        };

        Ok(ArtifactDownload {
            filename: download_filename(record.title.as_deref(), &primary, &record.id),
            path: primary,
            size: metadata.len(),
        })
    }

    /// Delete a record and its index entry, then its artifacts best-effort.
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        if !self.config.allow_delete {
            return Err(ServiceError::Forbidden("deletion is disabled".to_string()));
        }

        let record = self.find(id).await?;
        if !delete_archive(self.db.pool(), id).await? {
            return Err(not_found(id));
        }
        info!(archive_id = %id, "Archive deleted");

        let out_dir = PathBuf::from(&record.out_dir);
        if !out_dir.starts_with(self.config.archives_dir()) {
            warn!(archive_id = %id, path = %out_dir.display(), "Not removing artifacts outside the archive root");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&out_dir).await {
            Ok(()) => debug!(archive_id = %id, "Removed artifact directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(archive_id = %id, path = %out_dir.display(), "Failed to remove artifacts: {e}"),
        }
        Ok(())
    }

    /// Liveness plus queue depth and record counts.
    pub async fn health(&self) -> Result<HealthReport, ServiceError> {
        let queue = self.queue.stats().await?;
        let archives = count_archives_by_status(self.db.pool())
            .await?
            .into_iter()
            .collect();
        Ok(HealthReport {
            status: "ok",
            queue,
            archives,
        })
    }

    async fn find(&self, id: &str) -> Result<ArchiveRecord, ServiceError> {
        get_archive(self.db.pool(), id)
            .await?
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &str) -> ServiceError {
    ServiceError::NotFound(format!("archive {id} not found"))
}

fn validate_url(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation("url is required".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| ServiceError::Validation(format!("invalid url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::Validation(
            "url must use http or https".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ServiceError::Validation("url must have a host".to_string()));
    }

    Ok(trimmed.to_string())
}

fn parse_kind(kind: Option<&str>) -> Result<Option<ArchiveKind>, ServiceError> {
    match kind.map(str::trim) {
        None | Some("") => Ok(None),
        Some(k) => ArchiveKind::parse(k).map(Some).ok_or_else(|| {
            ServiceError::Validation(format!("kind must be 'page' or 'video', got '{k}'"))
        }),
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_archive_id_format() {
        let id = new_archive_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_archive_id());
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  https://example.com/a ").unwrap(),
            "https://example.com/a"
        );
        assert!(matches!(validate_url(""), Err(ServiceError::Validation(_))));
        assert!(matches!(
            validate_url("ftp://example.com/file"),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind(None).unwrap(), None);
        assert_eq!(parse_kind(Some("")).unwrap(), None);
        assert_eq!(parse_kind(Some("Video")).unwrap(), Some(ArchiveKind::Video));
        assert!(matches!(
            parse_kind(Some("article")),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(-5)), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_throttle_window() {
        let throttle = SubmissionThrottle::new(2);
        let start = Instant::now();

        throttle.check_at(start).unwrap();
        throttle.check_at(start + Duration::from_secs(1)).unwrap();
        assert!(matches!(
            throttle.check_at(start + Duration::from_secs(2)),
            Err(ServiceError::RateLimited(2))
        ));

        // The first submission leaves the window.
        throttle.check_at(start + Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn test_throttle_disabled() {
        let throttle = SubmissionThrottle::new(0);
        for _ in 0..1000 {
            throttle.check().unwrap();
        }
    }
}
