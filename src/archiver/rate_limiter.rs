//! Per-host concurrency limiting for capture workers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use url::Url;

/// At most `per_host_limit` captures run against any one host at a time.
#[derive(Debug)]
pub struct DomainRateLimiter {
    per_host_limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DomainRateLimiter {
    #[must_use]
    pub fn new(per_host_limit: usize) -> Self {
        Self {
            per_host_limit: per_host_limit.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a capture slot on `host`. The slot is released when the permit drops.
    ///
    /// # Errors
    ///
    /// Only if the host's semaphore is closed, which never happens here.
    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                hosts
                    .entry(host.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit))),
            )
        };
        semaphore.acquire_owned().await
    }
}

/// Lowercased host of `url`, used as the limiter key.
///
/// Unparseable URLs share one bucket.
#[must_use]
pub fn domain_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}
