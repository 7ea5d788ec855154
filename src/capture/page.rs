//! Web page capture using headless Chrome/Chromium.
//!
//! Renders the page, scrolls it to trigger lazily loaded content, and saves
//! the rendered HTML, an A4 PDF (the primary artifact) and a full-page PNG.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::extract::extract_metadata;
use super::traits::{CaptureError, CaptureResult, CaptureStrategy};
use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;
use crate::db::{now_timestamp, ArchiveKind, MetaValue, Metadata};

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

pub const HTML_FILE: &str = "page.html";
pub const PDF_FILE: &str = "snapshot.pdf";
pub const SCREENSHOT_FILE: &str = "snapshot.png";
pub const TEXT_FILE: &str = "content.txt";

/// Pause after navigation before scrolling starts.
const SETTLE_DELAY: Duration = Duration::from_millis(1000);
/// Pause between scroll steps.
const SCROLL_DELAY: Duration = Duration::from_millis(500);
const AUTO_SCROLL_JS: &str = "window.scrollBy(0, document.body.scrollHeight)";

// A4 in inches.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

/// Page capture configuration.
#[derive(Debug, Clone)]
pub struct PageCaptureConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Navigation timeout.
    pub page_timeout: Duration,
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    /// Auto-scroll iterations after the page settles.
    pub max_scrolls: u32,
}

impl PageCaptureConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            page_timeout: config.page_timeout,
            chrome_path: config.chrome_path.clone(),
            max_scrolls: config.max_scrolls,
        }
    }
}

/// Page capture strategy.
///
/// One headless browser is shared by all captures and launched lazily on
/// first use. Each capture gets its own tab.
pub struct PageCapture {
    config: PageCaptureConfig,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl PageCapture {
    #[must_use]
    pub fn new(config: PageCaptureConfig) -> Self {
        Self {
            config,
            browser: Arc::new(Mutex::new(None)),
        }
    }

    /// Launch the browser if it is not already running.
    async fn ensure_browser(&self, slot: &mut Option<Browser>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }

        info!("Launching headless browser for page captures");

        let mut config_builder = BrowserConfig::builder()
            .window_size(self.config.viewport_width, self.config.viewport_height)
            .request_timeout(self.config.page_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .arg(format!("--user-agent={ARCHIVAL_USER_AGENT}"));

        if let Some(ref chrome_path) = self.config.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        *slot = Some(browser);
        info!("Headless browser launched");

        Ok(())
    }

    /// Open a tab on `url`. The browser lock is only held while the tab is created.
    async fn open_page(&self, url: &str) -> Result<Page> {
        let mut guard = self.browser.lock().await;
        self.ensure_browser(&mut guard).await?;
        let browser = guard.as_ref().context("Browser not initialized")?;

        let opened = tokio::time::timeout(self.config.page_timeout, browser.new_page(url)).await;
        match opened {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => {
                // The browser may have died; relaunch on the next capture.
                warn!(url = %url, "Failed to open page, dropping browser: {e}");
                *guard = None;
                Err(anyhow::Error::new(e).context("Failed to open page"))
            }
            Err(_) => anyhow::bail!(
                "Timed out after {}s opening page",
                self.config.page_timeout.as_secs()
            ),
        }
    }

    async fn render(&self, page: &Page, url: &str, out_dir: &Path) -> Result<CaptureResult> {
        tokio::time::timeout(self.config.page_timeout, page.wait_for_navigation())
            .await
            .context("Navigation timed out")?
            .context("Navigation failed")?;

        tokio::time::sleep(SETTLE_DELAY).await;
        for _ in 0..self.config.max_scrolls {
            if let Err(e) = page.evaluate(AUTO_SCROLL_JS).await {
                debug!(url = %url, "Auto-scroll stopped: {e}");
                break;
            }
            tokio::time::sleep(SCROLL_DELAY).await;
        }

        let page_title = page
            .get_title()
            .await
            .context("Failed to read page title")?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let html = page.content().await.context("Failed to read page content")?;
        let html_path = out_dir.join(HTML_FILE);
        write_artifact(&html_path, html.as_bytes()).await?;

        let pdf_params = PrintToPdfParams {
            print_background: Some(true),
            paper_width: Some(A4_WIDTH_IN),
            paper_height: Some(A4_HEIGHT_IN),
            ..Default::default()
        };
        let pdf = page.pdf(pdf_params).await.context("Failed to print PDF")?;
        let pdf_path = out_dir.join(PDF_FILE);
        write_artifact(&pdf_path, &pdf).await?;

        let screenshot_path = self.capture_screenshot(page, url, out_dir).await;

        let (html_title, text) = extract_metadata(&html);
        let title = page_title.or(html_title);

        let meta = page_metadata(
            title.as_deref(),
            url,
            &pdf_path,
            screenshot_path.as_deref(),
            &html_path,
            &hex::encode(Sha256::digest(&pdf)),
        );

        debug!(url = %url, pdf_bytes = pdf.len(), text_chars = text.len(), "Page captured");

        Ok(CaptureResult {
            title,
            primary_path: pdf_path,
            meta,
            text_content: Some(text),
            text_path: Some(out_dir.join(TEXT_FILE)),
        })
    }

    /// Full-page screenshot. Best-effort; very tall pages can fail to render.
    async fn capture_screenshot(&self, page: &Page, url: &str, out_dir: &Path) -> Option<PathBuf> {
        let params = ScreenshotParams::builder().full_page(true).build();
        let png = match page.screenshot(params).await {
            Ok(png) => png,
            Err(e) => {
                warn!(url = %url, "Failed to capture screenshot: {e}");
                return None;
            }
        };

        let path = out_dir.join(SCREENSHOT_FILE);
        match write_artifact(&path, &png).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(url = %url, "{e:#}");
                None
            }
        }
    }

    /// Shutdown the browser gracefully.
    pub async fn shutdown(&self) {
        let mut browser_guard = self.browser.lock().await;
        if let Some(mut browser) = browser_guard.take() {
            if let Err(e) = browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
        }
    }
}

#[async_trait]
impl CaptureStrategy for PageCapture {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Page
    }

    async fn capture(&self, url: &str, out_dir: &Path) -> Result<CaptureResult, CaptureError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        debug!(url = %url, "Capturing page");
        let page = self.open_page(url).await?;
        let result = self.render(&page, url, out_dir).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }

        result.map_err(CaptureError::from)
    }
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn page_metadata(
    title: Option<&str>,
    url: &str,
    pdf_path: &Path,
    screenshot_path: Option<&Path>,
    html_path: &Path,
    pdf_sha256: &str,
) -> Metadata {
    let display = |p: &Path| p.display().to_string();

    let mut meta = Metadata::new();
    meta.insert("title".to_string(), title.into());
    meta.insert("captured_at".to_string(), now_timestamp().into());
    meta.insert("source_url".to_string(), url.into());
    meta.insert("artifact_pdf".to_string(), display(pdf_path).into());
    meta.insert(
        "artifact_screenshot".to_string(),
        screenshot_path.map(display).into(),
    );
    meta.insert("artifact_html".to_string(), display(html_path).into());
    meta.insert("pdf_sha256".to_string(), MetaValue::from(pdf_sha256));
    meta
}
