//! Durable at-least-once capture queue backed by the `capture_jobs` table.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::db::{
    claim_next_capture_job, complete_capture_job, create_archive_with_job, fail_capture_job,
    get_capture_queue_stats, insert_capture_job, requeue_expired_capture_jobs, touch_capture_job,
    ArchiveKind, ArchiveRecord, Database, QueueStats,
};

/// Work item carried from submission to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureTask {
    pub archive_id: String,
    pub url: String,
    pub kind: ArchiveKind,
}

/// A task handed to exactly one worker until acked, failed, or expired.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub attempts: i64,
    pub task: CaptureTask,
}

/// Job queue handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
    notify: Arc<Notify>,
    max_attempts: u32,
}

impl JobQueue {
    /// `max_attempts` bounds deliveries per task; 1 means no queue-level retry.
    #[must_use]
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Durably append a task and wake one idle worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the task could not be stored; it is never dropped silently.
    pub async fn enqueue(&self, task: &CaptureTask) -> Result<i64> {
        let job_id =
            insert_capture_job(self.db.pool(), &task.archive_id, &task.url, task.kind).await?;
        debug!(job_id, archive_id = %task.archive_id, kind = %task.kind, "Enqueued capture job");
        self.notify.notify_one();
        Ok(job_id)
    }

    /// Create the QUEUED record for a new submission and queue its capture
    /// in one transaction, then wake one idle worker.
    ///
    /// # Errors
    ///
    /// Returns an error if either row could not be stored; nothing is kept then.
    pub async fn enqueue_new(&self, task: &CaptureTask, out_dir: &str) -> Result<ArchiveRecord> {
        let (record, job_id) = create_archive_with_job(
            self.db.pool(),
            &task.archive_id,
            &task.url,
            task.kind,
            out_dir,
        )
        .await?;
        debug!(job_id, archive_id = %task.archive_id, kind = %task.kind, "Enqueued capture job");
        self.notify.notify_one();
        Ok(record)
    }

    /// Claim the oldest pending task, if any.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        loop {
            let Some(job) = claim_next_capture_job(self.db.pool()).await? else {
                return Ok(None);
            };

            let Some(kind) = ArchiveKind::parse(&job.kind) else {
                // Undeliverable; park it instead of handing it out forever.
                warn!(job_id = job.id, kind = %job.kind, "Dropping capture job with unknown kind");
                fail_capture_job(self.db.pool(), job.id, "unknown capture kind", 0).await?;
                continue;
            };

            return Ok(Some(ClaimedJob {
                job_id: job.id,
                attempts: job.attempts,
                task: CaptureTask {
                    archive_id: job.archive_id,
                    url: job.url,
                    kind,
                },
            }));
        }
    }

    /// Mark a claimed task as done.
    pub async fn ack(&self, job: &ClaimedJob) -> Result<()> {
        complete_capture_job(self.db.pool(), job.job_id).await
    }

    /// Extend the claim on a job that is still in progress.
    ///
    /// Returns `false` if the claim was already lost.
    pub async fn touch(&self, job: &ClaimedJob) -> Result<bool> {
        touch_capture_job(self.db.pool(), job.job_id).await
    }

    /// Record a failed delivery. Returns `true` if the task was put back for another attempt.
    pub async fn fail(&self, job: &ClaimedJob, error: &str) -> Result<bool> {
        let state = fail_capture_job(self.db.pool(), job.job_id, error, self.max_attempts).await?;
        let requeued = state == "pending";
        if requeued {
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    /// Return claims older than `visibility_timeout` to pending.
    ///
    /// Covers workers that died mid-task. Returns the number of requeued tasks.
    pub async fn requeue_expired(&self, visibility_timeout: Duration) -> Result<u64> {
        let timeout = chrono::Duration::from_std(visibility_timeout)
            .context("Visibility timeout out of range")?;
        let cutoff = (Utc::now() - timeout).to_rfc3339_opts(SecondsFormat::Micros, true);

        let count = requeue_expired_capture_jobs(self.db.pool(), &cutoff).await?;
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    /// Queue depth by state.
    pub async fn stats(&self) -> Result<QueueStats> {
        get_capture_queue_stats(self.db.pool()).await
    }

    pub async fn pending_count(&self) -> Result<i64> {
        Ok(self.stats().await?.pending)
    }

    /// Wait until a task may be available or `max_wait` elapses.
    pub async fn wait(&self, max_wait: Duration) {
        tokio::select! {
            () = self.notify.notified() => {}
            () = tokio::time::sleep(max_wait) => {}
        }
    }
}
