//! Source adapter trait and the registry of supported upstreams.
//!
//! Each adapter turns a source-specific identifier into the common read
//! models of [`crate::models`]. The set of sources is closed: every variant is
//! listed in [`SourceKind`] and registered in [`SourceRegistry`].

mod imgchest;
mod mangadex;
pub mod merge;
mod weebcentral;

pub use imgchest::ImgChestSource;
pub use mangadex::MangaDexSource;
pub use weebcentral::WeebCentralSource;

use crate::cache::CacheLayer;
use crate::config::Config;
use crate::error::SourceError;
use crate::gateway::RequestGateway;
use crate::models::{ChapterPages, ChapterReference, SeriesMetadata, SeriesPage, Shortcut};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Key identifying an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    MangaDex,
    WeebCentral,
    ImgChest,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::MangaDex,
        SourceKind::WeebCentral,
        SourceKind::ImgChest,
    ];

    /// Returns the identifier used in paths and cache keys.
    pub fn key(self) -> &'static str {
        match self {
            SourceKind::MangaDex => "mangadex",
            SourceKind::WeebCentral => "weebcentral",
            SourceKind::ImgChest => "imgchest",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.key() == wanted)
            .ok_or_else(|| SourceError::UnknownSource(s.to_string()))
    }
}

/// Memoization of one read operation at the orchestrator level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRule {
    pub prefix: &'static str,
    pub ttl: Duration,
}

impl CacheRule {
    pub const fn new(prefix: &'static str, ttl_secs: u64) -> Self {
        Self {
            prefix,
            ttl: Duration::from_secs(ttl_secs),
        }
    }
}

/// Per-operation cache rules; `None` leaves the operation unmemoized.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePolicy {
    pub series: Option<CacheRule>,
    pub chapter: Option<CacheRule>,
    pub series_page: Option<CacheRule>,
}

/// Trait for upstream source adapters.
///
/// `Ok(None)` means the upstream has no such item. Operational problems are
/// reported as `Err`, and no method ever returns a partially built value.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Returns the key this adapter is registered under.
    fn kind(&self) -> SourceKind;

    /// Returns how the orchestrator should memoize this adapter's results.
    fn cache_policy(&self) -> CachePolicy;

    /// Resolves a series with its groups and chapters.
    async fn resolve_series(&self, id: &str) -> Result<Option<SeriesMetadata>, SourceError>;

    /// Resolves the page images of one chapter.
    async fn resolve_chapter(&self, id: &str) -> Result<Option<ChapterPages>, SourceError>;

    /// Resolves the display projection of a series.
    async fn resolve_series_page(&self, id: &str) -> Result<Option<SeriesPage>, SourceError>;

    /// Maps a deep link or legacy identifier to a canonical location.
    async fn resolve_shortcut(&self, raw: &str) -> Result<Option<Shortcut>, SourceError>;

    /// Wraps a raw upstream chapter id into a reference.
    fn wrap_chapter_reference(&self, raw_id: &str) -> ChapterReference {
        ChapterReference::new(self.kind(), raw_id)
    }
}

/// Registry of available sources.
pub struct SourceRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Creates a registry with every supported source.
    pub fn new(config: &Config, gateway: Arc<RequestGateway>, cache: Arc<CacheLayer>) -> Self {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(MangaDexSource::new(config, gateway.clone(), cache.clone())),
            Arc::new(WeebCentralSource::new(
                &config.sources,
                gateway.clone(),
                cache.clone(),
            )),
            Arc::new(ImgChestSource::new(&config.sources, gateway, cache)),
        ];

        Self::from_adapters(adapters)
    }

    /// Creates a registry from explicit adapters; later ones replace earlier ones.
    pub fn from_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();

        Self { adapters }
    }

    /// Finds the adapter for a source key.
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind)
    }
}

/// Turns a 404 into "not found" and passes every other outcome through.
pub(crate) fn absent_on_404<T>(result: Result<T, SourceError>) -> Result<Option<T>, SourceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, StubTransport};

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("mangadex".parse::<SourceKind>().unwrap(), SourceKind::MangaDex);
        assert_eq!(" WeebCentral ".parse::<SourceKind>().unwrap(), SourceKind::WeebCentral);
        assert!(matches!(
            "nhentai".parse::<SourceKind>(),
            Err(SourceError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_registry_has_every_source() {
        let harness = Harness::new(StubTransport::new());
        let registry = SourceRegistry::new(&harness.config, harness.gateway, harness.cache);

        for kind in SourceKind::ALL {
            let adapter = registry.get(kind).unwrap();
            assert_eq!(adapter.kind(), kind);
            assert_eq!(adapter.wrap_chapter_reference("x").source, kind);
        }
    }

    #[test]
    fn test_absent_on_404() {
        let missing: Result<(), _> = Err(SourceError::UpstreamHttp {
            url: "u".to_string(),
            status: 404,
        });
        assert!(absent_on_404(missing).unwrap().is_none());

        let broken: Result<(), _> = Err(SourceError::UpstreamHttp {
            url: "u".to_string(),
            status: 500,
        });
        assert!(absent_on_404(broken).is_err());
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.com/", "/p/x"), "https://a.com/p/x");
        assert_eq!(join_url("https://a.com", "p/x"), "https://a.com/p/x");
    }
}
