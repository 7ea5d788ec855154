//! Capture strategies and their selection by kind.

pub mod extract;
pub mod page;
pub mod registry;
pub mod selector;
pub mod traits;
pub mod video;

use std::sync::Arc;

pub use page::{PageCapture, PageCaptureConfig};
pub use registry::StrategyRegistry;
pub use selector::select_kind;
pub use traits::{CaptureError, CaptureResult, CaptureStrategy};
pub use video::{VideoCapture, VideoCaptureConfig};

use crate::config::Config;

/// Registry with the browser-backed page strategy and the yt-dlp video strategy.
///
/// Also returns the page strategy so the caller can shut its browser down.
#[must_use]
pub fn default_strategies(config: &Config) -> (StrategyRegistry, Arc<PageCapture>) {
    let page = Arc::new(PageCapture::new(PageCaptureConfig::from_config(config)));
    let video = Arc::new(VideoCapture::new(VideoCaptureConfig::from_config(config)));

    let registry = StrategyRegistry::new()
        .with(page.clone())
        .with(video);

    (registry, page)
}
