//! WeebCentral (weebcentral.com) adapter.
//!
//! WeebCentral has no API, so series data is scraped from the series page and
//! its full chapter list. Chapters carry no usable number, so they are
//! numbered by position.

use super::merge::{MergeResolver, UpstreamChapter, chapter_rows};
use super::{CachePolicy, CacheRule, SourceAdapter, SourceKind, absent_on_404, join_url};
use crate::cache::CacheLayer;
use crate::config::SourcesConfig;
use crate::error::SourceError;
use crate::gateway::{FetchOptions, RequestGateway};
use crate::models::{ChapterPages, ChapterRow, SeriesMetadata, SeriesPage, Shortcut};
use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::info;

const GROUP_NAME: &str = "WeebCentral";
const VOLUME: &str = "NA";
const NO_AUTHOR: &str = "None";
const NO_DESCRIPTION: &str = "No Description.";

const COMMON_PREFIX: &str = "nn_common_scrape_dt";
const COMMON_TTL: Duration = Duration::from_secs(600);

const DIRECT: FetchOptions = FetchOptions {
    headers: &[],
    use_relay: false,
};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w-]+$").unwrap());

/// Series id embedded in the inline script of a chapter page.
static SERIES_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'series_id'\s*:\s*'([A-Z0-9]+)'").unwrap());

static SERIES_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)series/([\w-]+)").unwrap());

static CHAPTER_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)chapters/([\w-]+)").unwrap());

/// CSS selectors used for parsing.
struct Selectors {
    title: Selector,
    /// Entries of the metadata lists; each has a `strong` label.
    info_item: Selector,
    label: Selector,
    author_link: Selector,
    paragraph: Selector,
    cover_section: Selector,
    image: Selector,
    chapter_link: Selector,
    chapter_name: Selector,
    chapter_time: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            title: Selector::parse("h1").unwrap(),
            info_item: Selector::parse("ul > li").unwrap(),
            label: Selector::parse("strong").unwrap(),
            author_link: Selector::parse("span > a").unwrap(),
            paragraph: Selector::parse("p").unwrap(),
            cover_section: Selector::parse("section[x-data] > section").unwrap(),
            image: Selector::parse("img[src]").unwrap(),
            chapter_link: Selector::parse("div[x-data] > a[href]").unwrap(),
            chapter_name: Selector::parse("span.flex > span").unwrap(),
            chapter_time: Selector::parse("time[datetime]").unwrap(),
        }
    }
}

/// Fields scraped from the series page.
#[derive(Debug, PartialEq)]
struct SeriesDetails {
    title: String,
    author: String,
    description: String,
    cover: String,
}

/// One row of the full chapter list, newest first.
#[derive(Debug, PartialEq)]
struct ListedChapter {
    slug: String,
    name: String,
    timestamp: Option<i64>,
}

/// Series data shared by the series and series-page projections.
#[derive(Debug)]
struct WeebCentralSeries {
    metadata: SeriesMetadata,
    chapter_list: Vec<ChapterRow>,
    /// Raw chapter slug to the number it was filed under.
    chapter_numbers: HashMap<String, String>,
}

/// WeebCentral source backed by HTML scraping.
pub struct WeebCentralSource {
    gateway: Arc<RequestGateway>,
    cache: Arc<CacheLayer>,
    base_url: String,
    selectors: Selectors,
}

impl WeebCentralSource {
    /// Creates a new WeebCentral adapter.
    pub fn new(urls: &SourcesConfig, gateway: Arc<RequestGateway>, cache: Arc<CacheLayer>) -> Self {
        Self {
            gateway,
            cache,
            base_url: urls.weebcentral.clone(),
            selectors: Selectors::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn check_id(id: &str) -> Result<(), SourceError> {
        if ID_PATTERN.is_match(id) {
            Ok(())
        } else {
            Err(SourceError::InvalidIdentifier(id.to_string()))
        }
    }

    /// Fetches a page body; a 404 yields `None`.
    async fn fetch_page(&self, url: &str) -> Result<Option<String>, SourceError> {
        let response = absent_on_404(self.gateway.get(url, DIRECT).await)?;
        Ok(response.map(|response| response.body))
    }

    async fn series_common(&self, id: &str) -> Result<Option<Arc<WeebCentralSeries>>, SourceError> {
        Self::check_id(id)?;
        self.cache
            .get_or_compute(&CacheLayer::key(COMMON_PREFIX, id), COMMON_TTL, || {
                self.scrape_series(id)
            })
            .await
    }

    async fn scrape_series(&self, id: &str) -> Result<Option<WeebCentralSeries>, SourceError> {
        let Some(series_html) = self.fetch_page(&self.url(&format!("series/{}", id))).await? else {
            return Ok(None);
        };
        let Some(list_html) = self
            .fetch_page(&self.url(&format!("series/{}/full-chapter-list", id)))
            .await?
        else {
            return Ok(None);
        };

        let Some(details) = self.parse_series(&series_html) else {
            return Ok(None);
        };
        let listed = self.parse_chapter_list(&list_html);
        info!(series = id, chapters = listed.len(), "scraped WeebCentral series");

        let total = listed.len();
        let mut resolver = MergeResolver::new();
        let mut chapter_numbers = HashMap::new();
        for (position, chapter) in listed.into_iter().enumerate() {
            let number = (total - position).to_string();
            let reference = self.wrap_chapter_reference(&chapter.slug);
            chapter_numbers.insert(chapter.slug, number.clone());
            resolver.add(UpstreamChapter {
                number: Some(number),
                title: Some(chapter.name),
                volume: Some(VOLUME.to_string()),
                group: "1".to_string(),
                reference,
                timestamp: chapter.timestamp,
            });
        }

        let groups = BTreeMap::from([("1".to_string(), GROUP_NAME.to_string())]);
        let chapters = resolver.finish();
        let chapter_list = chapter_rows(&chapters, &groups, VOLUME);

        let metadata = SeriesMetadata {
            slug: id.to_string(),
            title: details.title,
            description: details.description,
            author: details.author.clone(),
            artist: details.author,
            cover: details.cover,
            groups,
            chapters,
        };

        Ok(Some(WeebCentralSeries {
            metadata,
            chapter_list,
            chapter_numbers,
        }))
    }

    /// Parses the series page; `None` when it has no title.
    fn parse_series(&self, html: &str) -> Option<SeriesDetails> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&self.selectors.title)
            .next()
            .map(|elem| elem.text().collect::<String>().trim().to_string())?;

        let author = self
            .labelled_item(&doc, "Author")
            .map(|item| {
                item.select(&self.selectors.author_link)
                    .map(|link| link.text().collect::<String>().trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|authors| !authors.is_empty())
            .unwrap_or_else(|| NO_AUTHOR.to_string());

        let description = self
            .labelled_item(&doc, "Description")
            .and_then(|item| item.select(&self.selectors.paragraph).next())
            .map(|p| p.text().collect::<String>().trim().to_string())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        let cover = doc
            .select(&self.selectors.cover_section)
            .next()
            .and_then(|section| section.select(&self.selectors.image).next())
            .and_then(|img| img.value().attr("src"))
            .unwrap_or_default()
            .to_string();

        Some(SeriesDetails {
            title,
            author,
            description,
            cover,
        })
    }

    /// Finds the first list item whose `strong` label mentions `label`.
    fn labelled_item<'a>(&self, doc: &'a Html, label: &str) -> Option<ElementRef<'a>> {
        doc.select(&self.selectors.info_item).find(|item| {
            item.select(&self.selectors.label)
                .any(|strong| strong.text().collect::<String>().contains(label))
        })
    }

    fn parse_chapter_list(&self, html: &str) -> Vec<ListedChapter> {
        let doc = Html::parse_document(html);

        doc.select(&self.selectors.chapter_link)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let slug = href.trim_end_matches('/').rsplit('/').next()?.to_string();
                let name = link
                    .select(&self.selectors.chapter_name)
                    .next()
                    .map(|span| span.text().collect::<String>().trim().to_string())
                    .unwrap_or_default();
                let timestamp = link
                    .select(&self.selectors.chapter_time)
                    .next()
                    .and_then(|time| time.value().attr("datetime"))
                    .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                    .map(|date| date.timestamp());

                Some(ListedChapter {
                    slug,
                    name,
                    timestamp,
                })
            })
            .collect()
    }

    fn parse_images(&self, html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        doc.select(&self.selectors.image)
            .filter_map(|img| img.value().attr("src"))
            .map(str::to_string)
            .collect()
    }

    /// Maps a chapter slug to `(series, chapter)` through the chapter page.
    async fn locate_chapter(&self, slug: &str) -> Result<Option<(String, String)>, SourceError> {
        let Some(html) = self.fetch_page(&self.url(&format!("chapters/{}", slug))).await? else {
            return Ok(None);
        };
        let series_id = SERIES_ID_REGEX
            .captures(&html)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| SourceError::Parse(format!("no series id on chapter page {}", slug)))?;

        let Some(common) = self.series_common(&series_id).await? else {
            return Ok(None);
        };
        Ok(common
            .chapter_numbers
            .get(slug)
            .map(|number| (series_id, number.clone())))
    }
}

#[async_trait]
impl SourceAdapter for WeebCentralSource {
    fn kind(&self) -> SourceKind {
        SourceKind::WeebCentral
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            series: None,
            chapter: Some(CacheRule::new("nn_chapter_dt", 3600)),
            series_page: None,
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
        let url = self.url(&format!(
            "chapters/{}/images?is_prev=False&current_page=1&reading_style=long_strip",
            id
        ));
        let Some(html) = self.fetch_page(&url).await? else {
            return Ok(None);
        };

        let pages = self.parse_images(&html);
        if pages.is_empty() {
            return Ok(None);
        }

        Ok(Some(ChapterPages {
            pages,
            series: id.to_string(),
            chapter: String::new(),
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
            original_url: self.url(&format!("series/{}", id)),
        }))
    }

    async fn resolve_shortcut(&self, raw: &str) -> Result<Option<Shortcut>, SourceError> {
        if let Some(caps) = CHAPTER_LINK.captures(raw) {
            return Ok(self
                .locate_chapter(&caps[1])
                .await?
                .map(|(series, chapter)| Shortcut::Chapter {
                    series,
                    chapter,
                    page: "1".to_string(),
                }));
        }

        if let Some(caps) = SERIES_LINK.captures(raw) {
            return Ok(Some(Shortcut::Series {
                series: caps[1].to_string(),
            }));
        }

        Ok(None)
    }
}
