//! MangaDex (api.mangadex.org) adapter.
//!
//! The series resolve fans out to the manga record and the paginated chapter
//! feed, resolves scanlation group names through a long-lived cache, and merges
//! per-group releases into one entry per chapter number.

use super::merge::{MergeResolver, UpstreamChapter, chapter_rows};
use super::{CachePolicy, CacheRule, SourceAdapter, SourceKind, absent_on_404};
use crate::cache::CacheLayer;
use crate::config::{Config, SourcesConfig};
use crate::error::SourceError;
use crate::gateway::{FetchOptions, RequestGateway};
use crate::models::{ChapterPages, ChapterRow, SeriesMetadata, SeriesPage, Shortcut};
use async_trait::async_trait;
use chrono::DateTime;
use futures::future::try_join_all;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

/// Only English releases are listed.
const SUPPORTED_LANG: &str = "en";

/// Relationship type naming the translating group.
const GROUP_KEY: &str = "scanlation_group";

/// Relationship type naming the uploading account.
const USER_KEY: &str = "user";

const CONTENT_RATINGS: &str = "contentRating[]=safe&contentRating[]=suggestive&contentRating[]=erotica&contentRating[]=pornographic";

/// Feed items requested per page.
const FEED_PAGE_SIZE: usize = 500;

/// Most group ids accepted by one `/group` call.
const GROUP_BATCH_LIMIT: usize = 100;

/// Languages tried, in order, when picking the display title.
const TITLE_PRECEDENCE: [&str; 3] = [SUPPORTED_LANG, "jp", "fr"];

const NO_TITLE: &str = "Couldn't Resolve Title";
const NO_ENGLISH_DESCRIPTION: &str = "No English description.";
const NO_DESCRIPTION: &str = "No description.";
const NO_VOLUME: &str = "Unknown";

/// Cache prefix for the shared series + feed result.
const COMMON_PREFIX: &str = "md_common_dt";
const COMMON_TTL: Duration = Duration::from_secs(600);

/// Cache prefix for resolved group names.
const GROUP_NAME_PREFIX: &str = "md_group_name";

const HEADERS_COMMON: &[(&str, &str)] = &[
    ("Referer", "https://mangadex.org"),
    ("User-Agent", "Hondana/1.0"),
];

const RELAYED: FetchOptions = FetchOptions {
    headers: HEADERS_COMMON,
    use_relay: true,
};

/// The relay can't forward repeated `ids[]` parameters, so group lookups go direct.
const DIRECT: FetchOptions = FetchOptions {
    headers: HEADERS_COMMON,
    use_relay: false,
};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w-]+$").unwrap());

static LEGACY_SERIES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,9}$").unwrap());

static LEGACY_CHAPTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,9})/(\d{1,4})(?:/(\d{1,4}))?$").unwrap());

static TITLE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)(?:title|manga)/([\w-]+)").unwrap());

static CHAPTER_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)chapter/([\w-]+)(?:/(\d{1,9}))?").unwrap());

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
    /// An object keyed by language, or an empty list when there is none.
    #[serde(default)]
    description: JsonValue,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    data: Vec<FeedChapter>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    id: String,
    attributes: FeedAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupList {
    data: Vec<GroupData>,
}

#[derive(Debug, Deserialize)]
struct GroupData {
    id: String,
    attributes: GroupAttributes,
}

#[derive(Debug, Deserialize)]
struct GroupAttributes {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    data: ChapterData,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyMapping {
    data: Vec<LegacyEntry>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    attributes: LegacyAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAttributes {
    new_id: String,
}

/// Who a feed chapter is credited to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attribution {
    Group(String),
    Uploader(String),
}

impl Attribution {
    fn of(chapter: &FeedChapter) -> Result<Self, SourceError> {
        let related = |kind: &str| {
            chapter
                .relationships
                .iter()
                .find(|rel| rel.kind == kind)
                .map(|rel| rel.id.clone())
        };

        related(GROUP_KEY)
            .map(Attribution::Group)
            .or_else(|| related(USER_KEY).map(Attribution::Uploader))
            .ok_or_else(|| SourceError::MissingAttribution {
                chapter_id: chapter.id.clone(),
            })
    }

    fn id(&self) -> &str {
        match self {
            Attribution::Group(id) | Attribution::Uploader(id) => id,
        }
    }
}

/// Series data shared by the series and series-page projections.
#[derive(Debug)]
struct MangaDexSeries {
    metadata: SeriesMetadata,
    chapter_list: Vec<ChapterRow>,
}

/// MangaDex source backed by the public REST API.
pub struct MangaDexSource {
    gateway: Arc<RequestGateway>,
    cache: Arc<CacheLayer>,
    urls: SourcesConfig,
    group_name_ttl: Duration,
}

impl MangaDexSource {
    /// Creates a new MangaDex adapter.
    pub fn new(config: &Config, gateway: Arc<RequestGateway>, cache: Arc<CacheLayer>) -> Self {
        Self {
            gateway,
            cache,
            urls: config.sources.clone(),
            group_name_ttl: Duration::from_secs(config.cache.group_name_ttl_sec),
        }
    }

    fn api(&self, path: &str) -> String {
        super::join_url(&self.urls.mangadex_api, path)
    }

    fn feed_url(&self, id: &str, offset: Option<usize>) -> String {
        let mut url = self.api(&format!(
            "manga/{}/feed?{}&translatedLanguage[]={}&limit={}&includeEmptyPages=0&includeFuturePublishAt=0&includeExternalUrl=0",
            id, CONTENT_RATINGS, SUPPORTED_LANG, FEED_PAGE_SIZE
        ));
        if let Some(offset) = offset {
            url.push_str(&format!("&offset={}", offset));
        }
        url
    }

    fn check_id(id: &str) -> Result<(), SourceError> {
        if ID_PATTERN.is_match(id) {
            Ok(())
        } else {
            Err(SourceError::InvalidIdentifier(id.to_string()))
        }
    }

    /// Returns the memoized series + feed result, fetching it on a miss.
    async fn series_common(&self, id: &str) -> Result<Option<Arc<MangaDexSeries>>, SourceError> {
        Self::check_id(id)?;
        self.cache
            .get_or_compute(&CacheLayer::key(COMMON_PREFIX, id), COMMON_TTL, || {
                self.fetch_series(id)
            })
            .await
    }

    async fn fetch_series(&self, id: &str) -> Result<Option<MangaDexSeries>, SourceError> {
        let manga_url = self.api(&format!("manga/{}?includes[]=cover_art", id));
        let feed_url = self.feed_url(id, None);

        let fetched = futures::try_join!(
            self.gateway.get_json::<MangaResponse>(&manga_url, RELAYED),
            self.gateway.get_json::<FeedPage>(&feed_url, RELAYED),
        );
        let Some((manga, first_page)) = absent_on_404(fetched)? else {
            return Ok(None);
        };

        let chapters = self.fetch_remaining_pages(id, first_page).await?;
        info!(series = id, chapters = chapters.len(), "fetched MangaDex feed");

        let attributions = chapters
            .iter()
            .map(Attribution::of)
            .collect::<Result<Vec<_>, _>>()?;

        // Indices follow first appearance across the feed.
        let mut index_of: HashMap<String, String> = HashMap::new();
        let mut credited: Vec<&Attribution> = Vec::new();
        for attribution in &attributions {
            if !index_of.contains_key(attribution.id()) {
                index_of.insert(
                    attribution.id().to_string(),
                    (index_of.len() + 1).to_string(),
                );
                credited.push(attribution);
            }
        }

        let group_ids: Vec<String> = credited
            .iter()
            .filter_map(|attribution| match attribution {
                Attribution::Group(id) => Some(id.clone()),
                Attribution::Uploader(_) => None,
            })
            .collect();
        let names = self.resolve_group_names(&group_ids).await?;

        let groups: BTreeMap<String, String> = credited
            .iter()
            .map(|attribution| {
                let raw = attribution.id();
                let name = names.get(raw).cloned().unwrap_or_else(|| raw.to_string());
                (index_of[raw].clone(), name)
            })
            .collect();

        let mut resolver = MergeResolver::new();
        for (chapter, attribution) in chapters.into_iter().zip(&attributions) {
            let timestamp = chapter.attributes.created_at.as_deref().and_then(parse_timestamp);
            resolver.add(UpstreamChapter {
                number: chapter.attributes.chapter,
                title: chapter.attributes.title,
                volume: chapter.attributes.volume,
                group: index_of[attribution.id()].clone(),
                reference: self.wrap_chapter_reference(&chapter.id),
                timestamp,
            });
        }
        let chapters = resolver.finish();
        let chapter_list = chapter_rows(&chapters, &groups, NO_VOLUME);

        let metadata = SeriesMetadata {
            slug: id.to_string(),
            title: resolve_title(&manga.data.attributes),
            description: resolve_description(&manga.data.attributes.description),
            author: String::new(),
            artist: String::new(),
            cover: self.cover_url(id, &manga.data.relationships),
            groups,
            chapters,
        };

        Ok(Some(MangaDexSeries {
            metadata,
            chapter_list,
        }))
    }

    /// Fetches every feed page after the first, concurrently.
    async fn fetch_remaining_pages(
        &self,
        id: &str,
        first_page: FeedPage,
    ) -> Result<Vec<FeedChapter>, SourceError> {
        let mut chapters = first_page.data;
        let total = first_page.total.unwrap_or(0);
        if total <= chapters.len() {
            return Ok(chapters);
        }

        let requests = (FEED_PAGE_SIZE..total)
            .step_by(FEED_PAGE_SIZE)
            .map(|offset| {
                let url = self.feed_url(id, Some(offset));
                async move { self.gateway.get_json::<FeedPage>(&url, RELAYED).await }
            });
        debug!(series = id, total, "fetching remaining feed pages");

        for page in try_join_all(requests).await? {
            chapters.extend(page.data);
        }
        Ok(chapters)
    }

    /// Maps group ids to names, asking the API only for names not cached yet.
    async fn resolve_group_names(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, SourceError> {
        let mut names = HashMap::new();
        let mut missing = Vec::new();

        for id in ids {
            match self
                .cache
                .get::<String>(&CacheLayer::key(GROUP_NAME_PREFIX, id))
                .await
            {
                Some(name) => {
                    names.insert(id.clone(), name.as_ref().clone());
                }
                None => missing.push(id.as_str()),
            }
        }

        if missing.is_empty() {
            return Ok(names);
        }

        debug!(count = missing.len(), "resolving scanlation group names");
        let requests = missing.chunks(GROUP_BATCH_LIMIT).map(|batch| {
            let mut url = self.api(&format!("group?limit={}", GROUP_BATCH_LIMIT));
            for id in batch {
                url.push_str("&ids[]=");
                url.push_str(id);
            }
            async move { self.gateway.get_json::<GroupList>(&url, DIRECT).await }
        });

        for list in try_join_all(requests).await? {
            for group in list.data {
                self.cache
                    .set(
                        &CacheLayer::key(GROUP_NAME_PREFIX, &group.id),
                        group.attributes.name.clone(),
                        self.group_name_ttl,
                    )
                    .await;
                names.insert(group.id, group.attributes.name);
            }
        }

        Ok(names)
    }

    fn cover_url(&self, id: &str, relationships: &[Relationship]) -> String {
        relationships
            .iter()
            .filter(|rel| rel.kind == "cover_art")
            .filter_map(|rel| rel.attributes.as_ref()?.get("fileName")?.as_str())
            .last()
            .map(|file| {
                super::join_url(
                    &self.urls.mangadex_uploads,
                    &format!("covers/{}/{}", id, file),
                )
            })
            .unwrap_or_default()
    }

    /// Translates a numeric legacy id into the current UUID.
    async fn map_legacy_id(&self, legacy_id: u64) -> Result<Option<String>, SourceError> {
        let body = json!({ "type": "manga", "ids": [legacy_id] });
        let response = self
            .gateway
            .post_json(&self.api("legacy/mapping"), &body, RELAYED)
            .await;
        let Some(response) = absent_on_404(response)? else {
            return Ok(None);
        };

        let mapping: LegacyMapping = serde_json::from_str(&response.body)?;
        Ok(mapping
            .data
            .into_iter()
            .next()
            .map(|entry| entry.attributes.new_id))
    }
}

#[async_trait]
impl SourceAdapter for MangaDexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::MangaDex
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            series: Some(CacheRule::new("md_series_dt", 600)),
            chapter: Some(CacheRule::new("md_chapter_dt", 300)),
            series_page: Some(CacheRule::new("md_series_page_dt", 600)),
        }
    }

    async fn resolve_series(&self, id: &str) -> Result<Option<SeriesMetadata>, SourceError> {
        Ok(self
            .series_common(id)
            .await?
            .map(|common| common.metadata.clone()))
    }

    async fn resolve_chapter(&self, id: &str) -> Result<Option<ChapterPages>, SourceError> {
        Self::check_id(id)?;
        let at_home_url = self.api(&format!("at-home/server/{}?forcePort443=true", id));
        let chapter_url = self.api(&format!("chapter/{}", id));

        let fetched = futures::try_join!(
            self.gateway.get_json::<AtHomeResponse>(&at_home_url, RELAYED),
            self.gateway.get_json::<ChapterResponse>(&chapter_url, RELAYED),
        );
        let Some((at_home, chapter)) = absent_on_404(fetched)? else {
            return Ok(None);
        };

        let pages = at_home
            .chapter
            .data
            .iter()
            .map(|file| {
                format!(
                    "{}/data/{}/{}",
                    at_home.base_url.trim_end_matches('/'),
                    at_home.chapter.hash,
                    file
                )
            })
            .collect();
        let series = chapter
            .data
            .relationships
            .iter()
            .find(|rel| rel.kind == "manga")
            .map(|rel| rel.id.clone())
            .unwrap_or_default();

        Ok(Some(ChapterPages {
            pages,
            series,
            chapter: chapter.data.attributes.chapter.unwrap_or_default(),
        }))
    }

    async fn resolve_series_page(&self, id: &str) -> Result<Option<SeriesPage>, SourceError> {
        let Some(common) = self.series_common(id).await? else {
            return Ok(None);
        };
        let metadata = &common.metadata;

        Ok(Some(SeriesPage {
            series: metadata.title.clone(),
            alt_titles: Vec::new(),
            slug: metadata.slug.clone(),
            cover: metadata.cover.clone(),
            synopsis: metadata.description.clone(),
            author: metadata.artist.clone(),
            chapter_list: common.chapter_list.clone(),
            original_url: super::join_url(&self.urls.mangadex_site, &format!("title/{}", id)),
        }))
    }

    async fn resolve_shortcut(&self, raw: &str) -> Result<Option<Shortcut>, SourceError> {
        let raw = raw.trim().trim_matches('/');

        if LEGACY_SERIES.is_match(raw) {
            let legacy_id = raw
                .parse()
                .map_err(|_| SourceError::InvalidIdentifier(raw.to_string()))?;
            return Ok(self
                .map_legacy_id(legacy_id)
                .await?
                .map(|series| Shortcut::Series { series }));
        }

        if let Some(caps) = LEGACY_CHAPTER.captures(raw) {
            let legacy_id = caps[1]
                .parse()
                .map_err(|_| SourceError::InvalidIdentifier(raw.to_string()))?;
            let chapter = caps[2].to_string();
            let page = caps.get(3).map_or("1", |m| m.as_str()).to_string();
            return Ok(self
                .map_legacy_id(legacy_id)
                .await?
                .map(|series| Shortcut::Chapter {
                    series,
                    chapter,
                    page,
                }));
        }

        if let Some(caps) = CHAPTER_LINK.captures(raw) {
            let page = caps.get(2).map_or("1", |m| m.as_str()).to_string();
            return Ok(self
                .resolve_chapter(&caps[1])
                .await?
                .map(|pages| Shortcut::Chapter {
                    series: pages.series,
                    chapter: pages.chapter,
                    page,
                }));
        }

        if let Some(caps) = TITLE_LINK.captures(raw) {
            return Ok(Some(Shortcut::Series {
                series: caps[1].to_string(),
            }));
        }

        Ok(None)
    }
}

/// Picks the display title by language precedence; main titles beat alt titles.
fn resolve_title(attributes: &MangaAttributes) -> String {
    let mut titles: HashMap<&str, &str> = HashMap::new();
    for alt in &attributes.alt_titles {
        for (lang, title) in alt {
            titles.insert(lang, title);
        }
    }
    for (lang, title) in &attributes.title {
        titles.insert(lang, title);
    }

    TITLE_PRECEDENCE
        .iter()
        .find_map(|lang| titles.get(lang))
        .map_or_else(|| NO_TITLE.to_string(), |title| title.to_string())
}

fn resolve_description(description: &JsonValue) -> String {
    match description {
        JsonValue::Object(map) if !map.is_empty() => map
            .get(SUPPORTED_LANG)
            .and_then(JsonValue::as_str)
            .unwrap_or(NO_ENGLISH_DESCRIPTION)
            .to_string(),
        _ => NO_DESCRIPTION.to_string(),
    }
}

fn parse_timestamp(created_at: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(created_at)
        .map(|date| date.timestamp())
        .ok()
}
