use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::processor::{ArchiveProcessor, ProcessError};
use super::rate_limiter::{domain_key, DomainRateLimiter};
use crate::config::Config;
use crate::queue::{ClaimedJob, JobQueue};

/// Slack on top of `job_timeout` before a claim counts as abandoned.
const CLAIM_GRACE: Duration = Duration::from_secs(60);
/// Longest gap between refreshes of a claim that is still being worked on.
const MAX_HEARTBEAT: Duration = Duration::from_secs(30);

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The processor failed; `requeued` tells whether the queue will redeliver.
    Failed { requeued: bool },
}

/// Archive worker pool consuming the capture queue.
pub struct ArchiveWorker {
    config: Arc<Config>,
    queue: JobQueue,
    processor: Arc<ArchiveProcessor>,
    semaphore: Arc<Semaphore>,
    domain_limiter: Arc<DomainRateLimiter>,
}

impl ArchiveWorker {
    #[must_use]
    pub fn new(config: Arc<Config>, queue: JobQueue, processor: Arc<ArchiveProcessor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        let domain_limiter = Arc::new(DomainRateLimiter::new(config.per_domain_concurrency));

        Self {
            config,
            queue,
            processor,
            semaphore,
            domain_limiter,
        }
    }

    /// How long a claim may go unrefreshed before it is handed out again.
    ///
    /// Always longer than `job_timeout`, so a capture the processor is still
    /// allowed to finish is never delivered twice.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        self.config.job_timeout + CLAIM_GRACE
    }

    fn heartbeat(&self) -> Duration {
        (self.visibility_timeout() / 4).min(MAX_HEARTBEAT)
    }

    /// Recover from a previous unclean shutdown.
    ///
    /// Every claim left behind by a dead process goes back to pending, so
    /// interrupted captures are delivered again.
    pub async fn recover_on_startup(&self) -> Result<u64> {
        let requeued = self.queue.requeue_expired(Duration::ZERO).await?;
        if requeued > 0 {
            info!(count = requeued, "Requeued capture jobs interrupted by shutdown");
        }
        Ok(requeued)
    }

    /// Run the worker loop. Never returns.
    pub async fn run(&self) {
        info!(
            concurrency = self.config.worker_concurrency,
            per_domain = self.config.per_domain_concurrency,
            visibility_secs = self.visibility_timeout().as_secs(),
            "Archive worker started"
        );

        let heartbeat = self.heartbeat();
        loop {
            match self.queue.requeue_expired(self.visibility_timeout()).await {
                Ok(0) => {}
                Ok(count) => warn!(count, "Requeued abandoned capture jobs"),
                Err(e) => error!("Error requeuing expired jobs: {e:#}"),
            }

            // Hold a slot before claiming so claimed jobs never wait on the pool.
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                error!("Worker semaphore closed, stopping");
                return;
            };

            let job = match self.queue.claim().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    self.queue.wait(self.config.poll_interval).await;
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    error!("Error claiming capture job: {e:#}");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            let queue = self.queue.clone();
            let processor = Arc::clone(&self.processor);
            let domain_limiter = Arc::clone(&self.domain_limiter);

            tokio::spawn(async move {
                let _global_permit = permit;
                let job_id = job.job_id;
                let archive_id = job.task.archive_id.clone();

                // Isolate panics from the loop; the claim expires and is redelivered.
                let handle = tokio::spawn(async move {
                    run_job(&queue, &processor, &domain_limiter, job, heartbeat).await
                });
                if let Err(e) = handle.await {
                    error!(job_id, archive_id = %archive_id, "Worker task panicked: {e}");
                }
            });
        }
    }

    /// Claim and run a single job inline. Returns `None` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(None);
        };
        let _permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        Ok(Some(
            run_job(
                &self.queue,
                &self.processor,
                &self.domain_limiter,
                job,
                self.heartbeat(),
            )
            .await,
        ))
    }
}

/// Run a claimed job, refreshing its claim every `heartbeat` until it settles.
async fn run_job(
    queue: &JobQueue,
    processor: &ArchiveProcessor,
    domain_limiter: &DomainRateLimiter,
    job: ClaimedJob,
    heartbeat: Duration,
) -> JobOutcome {
    let work = execute(queue, processor, domain_limiter, &job);
    tokio::pin!(work);

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            outcome = &mut work => return outcome,
            _ = ticker.tick() => refresh_claim(queue, &job).await,
        }
    }
}

async fn refresh_claim(queue: &JobQueue, job: &ClaimedJob) {
    match queue.touch(job).await {
        Ok(true) => {}
        Ok(false) => warn!(job_id = job.job_id, archive_id = %job.task.archive_id, "Capture job claim was lost"),
        Err(e) => warn!(job_id = job.job_id, "Failed to refresh capture job claim: {e:#}"),
    }
}

async fn execute(
    queue: &JobQueue,
    processor: &ArchiveProcessor,
    domain_limiter: &DomainRateLimiter,
    job: &ClaimedJob,
) -> JobOutcome {
    let domain = domain_key(&job.task.url);
    let _domain_permit = match domain_limiter.acquire(&domain).await {
        Ok(permit) => Some(permit),
        Err(e) => {
            warn!(domain = %domain, "Running without domain permit: {e}");
            None
        }
    };
    debug!(job_id = job.job_id, archive_id = %job.task.archive_id, domain = %domain, "Acquired domain permit");

    // The time spent waiting on the host does not count against the capture.
    refresh_claim(queue, job).await;

    match processor.process(&job.task).await {
        Ok(()) => {
            if let Err(e) = queue.ack(job).await {
                error!(job_id = job.job_id, "Failed to ack capture job: {e:#}");
            }
            JobOutcome::Completed
        }
        Err(e) => {
            if let ProcessError::Storage(ref inner) = e {
                error!(job_id = job.job_id, archive_id = %job.task.archive_id, "Storage error while processing: {inner:#}");
            }
            let requeued = match queue.fail(job, &e.to_string()).await {
                Ok(requeued) => requeued,
                Err(e2) => {
                    error!(job_id = job.job_id, "Failed to record job failure: {e2:#}");
                    false
                }
            };
            JobOutcome::Failed { requeued }
        }
    }
}
