//! ImageChest (imgchest.com) adapter.
//!
//! An album page embeds its whole data model as JSON in the `data-page`
//! attribute of `div#app`. Each album is exposed as a one-chapter series.

use super::merge::chapter_rows;
use super::{CachePolicy, CacheRule, SourceAdapter, SourceKind, absent_on_404, join_url};
use crate::cache::CacheLayer;
use crate::config::SourcesConfig;
use crate::error::SourceError;
use crate::gateway::{FetchOptions, RequestGateway};
use crate::models::{ChapterEntry, ChapterPages, SeriesMetadata, SeriesPage, Shortcut};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::info;

const GROUP_NAME: &str = "imgchest";
const NO_TITLE: &str = "No title";
const NO_DESCRIPTION: &str = "No description.";
const UNKNOWN: &str = "Unknown";

/// Albums always hold exactly this chapter, volume and group.
const ONLY: &str = "1";

const COMMON_PREFIX: &str = "imgchest_api_dt";
const COMMON_TTL: Duration = Duration::from_secs(300);

const DIRECT: FetchOptions = FetchOptions {
    headers: &[],
    use_relay: false,
};

static ALBUM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").unwrap());

static ALBUM_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|/)p/(\w+)").unwrap());

static APP_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div#app[data-page]").unwrap());

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(default)]
    props: Props,
}

#[derive(Debug, Default, Deserialize)]
struct Props {
    #[serde(default)]
    post: Post,
}

#[derive(Debug, Default, Deserialize)]
struct Post {
    title: Option<String>,
    #[serde(default)]
    files: Vec<PostFile>,
}

#[derive(Debug, Deserialize)]
struct PostFile {
    link: String,
}

/// Album contents shared by all three projections.
#[derive(Debug)]
struct Album {
    slug: String,
    title: String,
    pages: Vec<String>,
    original_url: String,
}

/// ImageChest source backed by the album page's embedded JSON.
pub struct ImgChestSource {
    gateway: Arc<RequestGateway>,
    cache: Arc<CacheLayer>,
    base_url: String,
}

impl ImgChestSource {
    /// Creates a new ImageChest adapter.
    pub fn new(urls: &SourcesConfig, gateway: Arc<RequestGateway>, cache: Arc<CacheLayer>) -> Self {
        Self {
            gateway,
            cache,
            base_url: urls.imgchest.clone(),
        }
    }

    async fn album(&self, id: &str) -> Result<Option<Arc<Album>>, SourceError> {
        if !ALBUM_ID.is_match(id) {
            return Err(SourceError::InvalidIdentifier(id.to_string()));
        }
        self.cache
            .get_or_compute(&CacheLayer::key(COMMON_PREFIX, id), COMMON_TTL, || {
                self.fetch_album(id)
            })
            .await
    }

    async fn fetch_album(&self, id: &str) -> Result<Option<Album>, SourceError> {
        let url = join_url(&self.base_url, &format!("p/{}", id));
        let Some(response) = absent_on_404(self.gateway.get(&url, DIRECT).await)? else {
            return Ok(None);
        };

        let post = parse_post(&response.body)?;
        let title = post.title.unwrap_or_else(|| NO_TITLE.to_string());
        let pages: Vec<String> = post.files.into_iter().map(|file| file.link).collect();
        if pages.is_empty() {
            return Ok(None);
        }
        info!(album = id, pages = pages.len(), "fetched ImageChest album");

        Ok(Some(Album {
            slug: id.to_string(),
            title,
            pages,
            original_url: url,
        }))
    }

    fn metadata(&self, album: &Album) -> SeriesMetadata {
        let entry = ChapterEntry {
            volume: ONLY.to_string(),
            title: album.title.clone(),
            groups: BTreeMap::from([(ONLY.to_string(), self.wrap_chapter_reference(&album.slug))]),
            release_date: BTreeMap::from([(ONLY.to_string(), None)]),
            last_updated: None,
        };

        SeriesMetadata {
            slug: album.slug.clone(),
            title: album.title.clone(),
            description: NO_DESCRIPTION.to_string(),
            author: UNKNOWN.to_string(),
            artist: UNKNOWN.to_string(),
            cover: album.pages.first().cloned().unwrap_or_default(),
            groups: BTreeMap::from([(ONLY.to_string(), GROUP_NAME.to_string())]),
            chapters: BTreeMap::from([(ONLY.to_string(), entry)]),
        }
    }
}

/// Extracts the post from the `data-page` blob of an album page.
fn parse_post(html: &str) -> Result<Post, SourceError> {
    let doc = Html::parse_document(html);
    let blob = doc
        .select(&APP_SELECTOR)
        .next()
        .and_then(|app| app.value().attr("data-page"))
        .ok_or_else(|| SourceError::Parse("album page has no data-page blob".to_string()))?;

    let data: PageData = serde_json::from_str(blob)?;
    Ok(data.props.post)
}

#[async_trait]
impl SourceAdapter for ImgChestSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ImgChest
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            series: Some(CacheRule::new("imgchest_series_dt", 300)),
            chapter: Some(CacheRule::new("imgchest_pages_dt", 300)),
            series_page: Some(CacheRule::new("imgchest_series_page_dt", 300)),
        }
    }

    async fn resolve_series(&self, id: &str) -> Result<Option<SeriesMetadata>, SourceError> {
        Ok(self.album(id).await?.map(|album| self.metadata(&album)))
    }

    async fn resolve_chapter(&self, id: &str) -> Result<Option<ChapterPages>, SourceError> {
        Ok(self.album(id).await?.map(|album| ChapterPages {
            pages: album.pages.clone(),
            series: album.slug.clone(),
            chapter: album.slug.clone(),
        }))
    }

    async fn resolve_series_page(&self, id: &str) -> Result<Option<SeriesPage>, SourceError> {
        let Some(album) = self.album(id).await? else {
            return Ok(None);
        };
        let metadata = self.metadata(&album);

        Ok(Some(SeriesPage {
            series: metadata.title.clone(),
            alt_titles: Vec::new(),
            slug: metadata.slug.clone(),
            cover: metadata.cover.clone(),
            synopsis: metadata.description.clone(),
            author: metadata.author.clone(),
            chapter_list: chapter_rows(&metadata.chapters, &metadata.groups, ONLY),
            original_url: album.original_url.clone(),
        }))
    }

    async fn resolve_shortcut(&self, raw: &str) -> Result<Option<Shortcut>, SourceError> {
        Ok(ALBUM_LINK.captures(raw).map(|caps| Shortcut::Chapter {
            series: caps[1].to_string(),
            chapter: ONLY.to_string(),
            page: ONLY.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChapterDate;
    use crate::testing::{Harness, StubResponse, StubTransport, fixture};

    const ALBUM: &str = "3yrgcl9xqy9";

    fn source(stub: Arc<StubTransport>) -> ImgChestSource {
        let harness = Harness::new(stub);
        ImgChestSource::new(&harness.config.sources, harness.gateway, harness.cache)
    }

    fn album_stub() -> Arc<StubTransport> {
        StubTransport::new().route(
            &format!("/p/{}", ALBUM),
            StubResponse::ok(fixture("imgchest_album.html")),
        )
    }

    #[tokio::test]
    async fn test_resolve_series_from_fixture() {
        let source = source(album_stub());

        let series = source.resolve_series(ALBUM).await.unwrap().unwrap();
        assert_eq!(series.title, "Oneshot: Quiet Harbor");
        assert_eq!(series.description, NO_DESCRIPTION);
        assert_eq!(series.author, "Unknown");
        assert_eq!(series.cover, "https://cdn.imgchest.com/files/abc001.png");
        assert_eq!(series.groups["1"], "imgchest");

        let entry = &series.chapters["1"];
        assert_eq!(entry.volume, "1");
        assert_eq!(entry.groups["1"].id, ALBUM);
        assert_eq!(entry.groups["1"].source, SourceKind::ImgChest);
        assert_eq!(entry.last_updated, None);
    }

    #[tokio::test]
    async fn test_resolve_chapter_keeps_file_order() {
        let stub = album_stub();
        let source = source(stub.clone());

        let pages = source.resolve_chapter(ALBUM).await.unwrap().unwrap();
        assert_eq!(
            pages.pages,
            vec![
                "https://cdn.imgchest.com/files/abc001.png",
                "https://cdn.imgchest.com/files/abc002.png",
                "https://cdn.imgchest.com/files/abc003.jpg",
            ]
        );
        assert_eq!(pages.series, ALBUM);

        source.resolve_series_page(ALBUM).await.unwrap().unwrap();
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_series_page_has_single_row() {
        let source = source(album_stub());

        let page = source.resolve_series_page(ALBUM).await.unwrap().unwrap();
        assert_eq!(page.chapter_list.len(), 1);
        let row = &page.chapter_list[0];
        assert_eq!(row.number, "1");
        assert_eq!(row.title, "Oneshot: Quiet Harbor");
        assert_eq!(row.group_label, "imgchest");
        assert_eq!(row.date, ChapterDate::Missing);
        assert_eq!(row.volume, "1");
        assert_eq!(page.original_url, format!("https://imgchest.com/p/{}", ALBUM));
    }

    #[tokio::test]
    async fn test_missing_album_is_not_found() {
        let source = source(StubTransport::new());
        assert!(source.resolve_series(ALBUM).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_album_without_files_is_not_found() {
        let html = r#"<div id="app" data-page='{"props":{"post":{"title":"Empty","files":[]}}}'></div>"#;
        let stub = StubTransport::new().route("/p/", StubResponse::ok(html));
        let source = source(stub);

        assert!(source.resolve_chapter(ALBUM).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_title_uses_default() {
        let html = r#"<div id="app" data-page='{"props":{"post":{"files":[{"link":"https://cdn.imgchest.com/files/x.png"}]}}}'></div>"#;
        let stub = StubTransport::new().route("/p/", StubResponse::ok(html));
        let source = source(stub);

        let series = source.resolve_series(ALBUM).await.unwrap().unwrap();
        assert_eq!(series.title, NO_TITLE);
    }

    #[tokio::test]
    async fn test_page_without_blob_is_parse_error() {
        let stub = StubTransport::new().route("/p/", StubResponse::ok("<html><body></body></html>"));
        let source = source(stub);

        let err = source.resolve_series(ALBUM).await.unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_blob_is_parse_error() {
        let html = r#"<div id="app" data-page='{"props": '></div>"#;
        let stub = StubTransport::new().route("/p/", StubResponse::ok(html));
        let source = source(stub);

        assert!(matches!(
            source.resolve_series(ALBUM).await,
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_album_shortcut() {
        let source = source(StubTransport::new());

        assert_eq!(
            source.resolve_shortcut("p/3yrgcl9xqy9/").await.unwrap(),
            Some(Shortcut::Chapter {
                series: ALBUM.to_string(),
                chapter: "1".to_string(),
                page: "1".to_string()
            })
        );
        assert_eq!(source.resolve_shortcut("nothing-here").await.unwrap(), None);
    }
}
