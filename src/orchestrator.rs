//! Entry point for every read: source lookup plus per-operation memoization.

use crate::cache::CacheLayer;
use crate::error::SourceError;
use crate::models::{ChapterPages, SeriesMetadata, SeriesPage, Shortcut};
use crate::sources::{CacheRule, SourceAdapter, SourceKind, SourceRegistry};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Dispatches reads to the registered adapters.
pub struct Orchestrator {
    registry: SourceRegistry,
    cache: Arc<CacheLayer>,
}

impl Orchestrator {
    pub fn new(registry: SourceRegistry, cache: Arc<CacheLayer>) -> Self {
        Self { registry, cache }
    }

    fn adapter(&self, source: &str) -> Result<&Arc<dyn SourceAdapter>, SourceError> {
        let kind: SourceKind = source.parse()?;
        self.registry
            .get(kind)
            .ok_or_else(|| SourceError::UnknownSource(source.to_string()))
    }

    /// Runs `resolve` through the adapter's cache rule, if it has one.
    async fn memoized<T, F, Fut>(
        &self,
        rule: Option<CacheRule>,
        id: &str,
        resolve: F,
    ) -> Result<Option<Arc<T>>, SourceError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, SourceError>>,
    {
        match rule {
            Some(rule) => {
                self.cache
                    .get_or_compute(&CacheLayer::key(rule.prefix, id), rule.ttl, resolve)
                    .await
            }
            None => Ok(resolve().await?.map(Arc::new)),
        }
    }

    /// Resolves series metadata.
    pub async fn series(
        &self,
        source: &str,
        id: &str,
    ) -> Result<Option<Arc<SeriesMetadata>>, SourceError> {
        let adapter = self.adapter(source)?;
        info!(source, id, "resolving series");
        self.memoized(adapter.cache_policy().series, id, || adapter.resolve_series(id))
            .await
    }

    /// Resolves the pages of a chapter.
    pub async fn chapter(
        &self,
        source: &str,
        id: &str,
    ) -> Result<Option<Arc<ChapterPages>>, SourceError> {
        let adapter = self.adapter(source)?;
        info!(source, id, "resolving chapter");
        self.memoized(adapter.cache_policy().chapter, id, || adapter.resolve_chapter(id))
            .await
    }

    /// Resolves the display projection of a series.
    pub async fn series_page(
        &self,
        source: &str,
        id: &str,
    ) -> Result<Option<Arc<SeriesPage>>, SourceError> {
        let adapter = self.adapter(source)?;
        info!(source, id, "resolving series page");
        self.memoized(adapter.cache_policy().series_page, id, || {
            adapter.resolve_series_page(id)
        })
        .await
    }

    /// Resolves a deep link; shortcuts are never memoized here.
    pub async fn shortcut(&self, source: &str, raw: &str) -> Result<Option<Shortcut>, SourceError> {
        let adapter = self.adapter(source)?;
        info!(source, raw, "resolving shortcut");
        adapter.resolve_shortcut(raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChapterReference;
    use crate::sources::CachePolicy;
    use crate::testing::{Harness, StubTransport};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter that counts calls and knows a single series, "known".
    #[derive(Default)]
    struct CountingSource {
        series_calls: AtomicUsize,
        chapter_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for CountingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::MangaDex
        }

        fn cache_policy(&self) -> CachePolicy {
            CachePolicy {
                series: Some(CacheRule::new("test_series", 60)),
                chapter: None,
                series_page: Some(CacheRule::new("test_page", 60)),
            }
        }

        async fn resolve_series(&self, id: &str) -> Result<Option<SeriesMetadata>, SourceError> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::UpstreamTimeout {
                    url: id.to_string(),
                });
            }
            if id != "known" {
                return Ok(None);
            }
            Ok(Some(SeriesMetadata {
                slug: id.to_string(),
                title: "Known".to_string(),
                description: String::new(),
                author: String::new(),
                artist: String::new(),
                cover: String::new(),
                groups: BTreeMap::new(),
                chapters: BTreeMap::new(),
            }))
        }

        async fn resolve_chapter(&self, id: &str) -> Result<Option<ChapterPages>, SourceError> {
            self.chapter_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ChapterPages {
                pages: vec![format!("https://img.example.com/{}/1.png", id)],
                series: "known".to_string(),
                chapter: "1".to_string(),
            }))
        }

        async fn resolve_series_page(&self, _id: &str) -> Result<Option<SeriesPage>, SourceError> {
            Ok(None)
        }

        async fn resolve_shortcut(&self, raw: &str) -> Result<Option<Shortcut>, SourceError> {
            Ok(Some(Shortcut::Series {
                series: raw.to_string(),
            }))
        }

        fn wrap_chapter_reference(&self, raw_id: &str) -> ChapterReference {
            ChapterReference::new(SourceKind::MangaDex, raw_id)
        }
    }

    fn orchestrator(source: Arc<CountingSource>) -> Orchestrator {
        let cache = Arc::new(CacheLayer::new(100));
        let adapter: Arc<dyn SourceAdapter> = source;
        Orchestrator::new(SourceRegistry::from_adapters(vec![adapter]), cache)
    }

    #[tokio::test]
    async fn test_present_series_is_memoized() {
        let source = Arc::new(CountingSource::default());
        let orchestrator = orchestrator(source.clone());

        let first = orchestrator.series("mangadex", "known").await.unwrap().unwrap();
        let second = orchestrator.series("mangadex", "known").await.unwrap().unwrap();
        assert_eq!(first.title, "Known");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.series_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_memoized() {
        let source = Arc::new(CountingSource::default());
        let orchestrator = orchestrator(source.clone());

        assert!(orchestrator.series("mangadex", "missing").await.unwrap().is_none());
        assert!(orchestrator.series("mangadex", "missing").await.unwrap().is_none());
        assert_eq!(source.series_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_memoized() {
        let source = Arc::new(CountingSource {
            fail: true,
            ..CountingSource::default()
        });
        let orchestrator = orchestrator(source.clone());

        for _ in 0..2 {
            let err = orchestrator.series("mangadex", "known").await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert_eq!(source.series_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_operation_without_rule_always_resolves() {
        let source = Arc::new(CountingSource::default());
        let orchestrator = orchestrator(source.clone());

        orchestrator.chapter("mangadex", "c1").await.unwrap().unwrap();
        orchestrator.chapter("mangadex", "c1").await.unwrap().unwrap();
        assert_eq!(source.chapter_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_source_is_rejected() {
        let orchestrator = orchestrator(Arc::new(CountingSource::default()));

        assert!(matches!(
            orchestrator.series("nhentai", "known").await,
            Err(SourceError::UnknownSource(_))
        ));
        // A valid key with no registered adapter is rejected the same way.
        assert!(matches!(
            orchestrator.chapter("imgchest", "x").await,
            Err(SourceError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn test_shortcut_is_dispatched() {
        let orchestrator = orchestrator(Arc::new(CountingSource::default()));

        assert_eq!(
            orchestrator.shortcut("MangaDex", "abc").await.unwrap(),
            Some(Shortcut::Series {
                series: "abc".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_full_registry_routes_by_key() {
        let harness = Harness::new(StubTransport::new());
        let registry =
            SourceRegistry::new(&harness.config, harness.gateway.clone(), harness.cache.clone());
        let orchestrator = Orchestrator::new(registry, harness.cache.clone());

        // Unrouted stub URLs answer 404, which every adapter reports as absent.
        assert!(orchestrator.series("imgchest", "abc").await.unwrap().is_none());
        assert!(orchestrator.chapter("weebcentral", "ABC").await.unwrap().is_none());
    }
}
