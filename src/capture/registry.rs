use std::collections::HashMap;
use std::sync::Arc;

use super::traits::CaptureStrategy;
use crate::db::ArchiveKind;

/// Capture strategies keyed by the kind they handle.
///
/// Dispatch on kind happens here and nowhere else.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<ArchiveKind, Arc<dyn CaptureStrategy>>,
}

impl StrategyRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy, replacing any previous one for the same kind.
    pub fn register(&mut self, strategy: Arc<dyn CaptureStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, strategy: Arc<dyn CaptureStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Find the strategy for a kind.
    #[must_use]
    pub fn get(&self, kind: ArchiveKind) -> Option<Arc<dyn CaptureStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Kinds without a registered strategy.
    #[must_use]
    pub fn missing_kinds(&self) -> Vec<ArchiveKind> {
        ArchiveKind::ALL
            .into_iter()
            .filter(|kind| !self.strategies.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::capture::{CaptureError, CaptureResult};

    struct Named(ArchiveKind, &'static str);

    #[async_trait]
    impl CaptureStrategy for Named {
        fn kind(&self) -> ArchiveKind {
            self.0
        }

        async fn capture(&self, _url: &str, _out_dir: &Path) -> Result<CaptureResult, CaptureError> {
            Err(CaptureError::new(self.1))
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let registry = StrategyRegistry::new()
            .with(Arc::new(Named(ArchiveKind::Page, "page")))
            .with(Arc::new(Named(ArchiveKind::Video, "video")));

        let video = registry.get(ArchiveKind::Video).unwrap();
        let err = video.capture("u", Path::new("/tmp")).await.unwrap_err();
        assert_eq!(err.message, "video");
        assert!(registry.missing_kinds().is_empty());
    }

    #[test]
    fn test_register_replaces_and_reports_missing() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(Named(ArchiveKind::Page, "first")));
        registry.register(Arc::new(Named(ArchiveKind::Page, "second")));

        assert!(registry.get(ArchiveKind::Page).is_some());
        assert!(registry.get(ArchiveKind::Video).is_none());
        assert_eq!(registry.missing_kinds(), vec![ArchiveKind::Video]);
    }
}
