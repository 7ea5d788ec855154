//! Shared fixtures: a temp-dir database and scriptable capture strategies.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url_archiver::archiver::{ArchiveProcessor, ArchiveWorker};
use url_archiver::capture::{CaptureError, CaptureResult, CaptureStrategy, StrategyRegistry};
use url_archiver::config::Config;
use url_archiver::db::{ArchiveKind, Database, MetaValue, Metadata};
use url_archiver::queue::JobQueue;
use url_archiver::service::ArchiveService;
use url_archiver::web::{create_app, AppState};

/// What a [`FakeStrategy`] does on its next capture.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write the primary artifact and return `title` and `text`.
    Succeed { title: String, text: String },
    Fail(String),
    /// Report a primary artifact that was never written.
    MissingPrimary,
    /// Sleep for the given time, then succeed like [`Behavior::Succeed`].
    Slow(Duration),
    /// Sleep longer than any test timeout.
    Hang,
}

impl Behavior {
    pub fn succeed(title: &str, text: &str) -> Self {
        Self::Succeed {
            title: title.to_string(),
            text: text.to_string(),
        }
    }
}

pub struct FakeStrategy {
    kind: ArchiveKind,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl FakeStrategy {
    pub fn new(kind: ArchiveKind, behavior: Behavior) -> Self {
        Self {
            kind,
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs captured so far, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn primary_name(&self) -> &'static str {
        match self.kind {
            ArchiveKind::Page => "snapshot.pdf",
            ArchiveKind::Video => "archive.mp4",
        }
    }

    fn text_name(&self) -> &'static str {
        match self.kind {
            ArchiveKind::Page => "content.txt",
            ArchiveKind::Video => "subtitles.txt",
        }
    }
}

#[async_trait]
impl CaptureStrategy for FakeStrategy {
    fn kind(&self) -> ArchiveKind {
        self.kind
    }

    async fn capture(&self, url: &str, out_dir: &Path) -> Result<CaptureResult, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let behavior = self.behavior.lock().unwrap().clone();

        let (title, text) = match behavior {
            Behavior::Succeed { title, text } => (title, text),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                ("Slow Page".to_string(), "eventually loaded".to_string())
            }
            Behavior::Fail(message) => return Err(CaptureError::new(message)),
            Behavior::MissingPrimary => {
                return Ok(CaptureResult {
                    title: Some("ghost".to_string()),
                    primary_path: out_dir.join(self.primary_name()),
                    ..CaptureResult::default()
                })
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(CaptureError::new("unreachable"));
            }
        };

        let primary_path = out_dir.join(self.primary_name());
        tokio::fs::write(&primary_path, format!("artifact for {url}"))
            .await
            .map_err(|e| CaptureError::new(e.to_string()))?;

        let mut meta = Metadata::new();
        meta.insert("title".to_string(), MetaValue::from(title.as_str()));
        meta.insert("source_url".to_string(), MetaValue::from(url));

        Ok(CaptureResult {
            title: Some(title),
            primary_path,
            meta,
            text_content: Some(text),
            text_path: Some(out_dir.join(self.text_name())),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub db: Database,
    pub queue: JobQueue,
    pub page: Arc<FakeStrategy>,
    pub video: Arc<FakeStrategy>,
    pub processor: Arc<ArchiveProcessor>,
    pub worker: ArchiveWorker,
    pub service: ArchiveService,
}

impl Harness {
    pub fn app(&self) -> axum::Router {
        create_app(AppState {
            service: self.service.clone(),
            config: Arc::clone(&self.config),
        })
    }

    /// Run queued jobs until the queue is empty.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while self.worker.process_next().await.unwrap().is_some() {
            processed += 1;
        }
        processed
    }
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(customize: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::for_testing(dir.path());
    customize(&mut config);
    let config = Arc::new(config);

    let db = Database::new(&config.database_path)
        .await
        .expect("Failed to create database");
    let queue = JobQueue::new(db.clone(), config.max_attempts);

    let page = Arc::new(FakeStrategy::new(
        ArchiveKind::Page,
        Behavior::succeed("Example Article", "the quick brown fox jumps"),
    ));
    let video = Arc::new(FakeStrategy::new(
        ArchiveKind::Video,
        Behavior::succeed("Example Video", "subtitle words here"),
    ));
    let strategies = StrategyRegistry::new()
        .with(page.clone())
        .with(video.clone());

    let processor = Arc::new(ArchiveProcessor::new(
        db.clone(),
        strategies,
        Arc::clone(&config),
    ));
    let worker = ArchiveWorker::new(Arc::clone(&config), queue.clone(), Arc::clone(&processor));
    let service = ArchiveService::new(db.clone(), queue.clone(), Arc::clone(&config));

    Harness {
        dir,
        config,
        db,
        queue,
        page,
        video,
        processor,
        worker,
        service,
    }
}
