//! Common read models emitted by every source.
//!
//! Values are built once per cache miss and shared as immutable snapshots.

use crate::sources::SourceKind;
use chrono::{DateTime, Datelike, Timelike};
use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Label shown for a chapter released by more than one group.
pub const MULTIPLE_GROUPS: &str = "Multiple Groups";

/// Shown in place of a missing release date.
pub const NO_DATE: &str = "No date.";

/// Anything above this is taken to be milliseconds rather than seconds.
const MAX_SECONDS_TIMESTAMP: i64 = 100_000_000_000;

/// Normalized series data: groups, chapters and descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesMetadata {
    /// Source-specific series id.
    pub slug: String,
    pub title: String,
    /// Plain-text synopsis, or a placeholder when the source has none.
    pub description: String,
    /// Empty when the source doesn't expose it.
    pub author: String,
    /// Empty when the source doesn't expose it.
    pub artist: String,
    /// Absolute cover image URL.
    pub cover: String,
    /// Group index ("1", "2", ...) to display name.
    pub groups: BTreeMap<String, String>,
    /// Chapter number to entry.
    pub chapters: BTreeMap<String, ChapterEntry>,
}

/// One logical chapter, possibly released by several groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterEntry {
    /// May be empty; chapter rows substitute the source's placeholder.
    pub volume: String,
    /// First non-empty title among the releases.
    pub title: String,
    /// Group index to the reference used to fetch that group's pages.
    pub groups: BTreeMap<String, ChapterReference>,
    /// Group index to Unix timestamp; has the same keys as `groups`.
    pub release_date: BTreeMap<String, Option<i64>>,
    /// Newest release timestamp across groups.
    pub last_updated: Option<i64>,
}

/// Token that lets a reader fetch a chapter's pages later on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChapterReference {
    /// Adapter that can resolve `id`.
    pub source: SourceKind,
    /// Source-specific chapter id.
    pub id: String,
}

impl ChapterReference {
    pub fn new(source: SourceKind, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }
}

impl fmt::Display for ChapterReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/chapter/{}/", self.source, self.id)
    }
}

/// Page images of one chapter, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterPages {
    /// Absolute image URLs.
    pub pages: Vec<String>,
    /// Series identifier as the source reports it.
    pub series: String,
    /// Chapter identifier as the source reports it; may be empty.
    pub chapter: String,
}

/// Display-oriented projection of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPage {
    /// Display title.
    pub series: String,
    pub alt_titles: Vec<String>,
    /// Source-specific series id.
    pub slug: String,
    /// Absolute cover image URL.
    pub cover: String,
    pub synopsis: String,
    pub author: String,
    /// Newest chapter first.
    pub chapter_list: Vec<ChapterRow>,
    /// Series page on the upstream site.
    pub original_url: String,
}

/// A row of the chapter table.
///
/// Serialized as a 7-tuple, which is the shape the reader front-end expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRow {
    /// Chapter key as used in `SeriesMetadata::chapters`.
    pub number: String,
    /// Number shown to readers.
    pub display_number: String,
    pub title: String,
    /// `number` with dots replaced by dashes, for use in URLs.
    pub slug_number: String,
    /// Group name, or [`MULTIPLE_GROUPS`] for shared releases.
    pub group_label: String,
    /// Date of the newest release.
    pub date: ChapterDate,
    pub volume: String,
}

impl Serialize for ChapterRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(7)?;
        tuple.serialize_element(&self.number)?;
        tuple.serialize_element(&self.display_number)?;
        tuple.serialize_element(&self.title)?;
        tuple.serialize_element(&self.slug_number)?;
        tuple.serialize_element(&self.group_label)?;
        tuple.serialize_element(&self.date)?;
        tuple.serialize_element(&self.volume)?;
        tuple.end()
    }
}

/// Release date of a row: broken-down UTC time with a zero-based month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterDate {
    /// Year, month (0-11), day, hour, minute, second.
    Parts([i32; 6]),
    /// Serialized as [`NO_DATE`].
    Missing,
}

impl ChapterDate {
    pub fn from_timestamp(timestamp: Option<i64>) -> Self {
        let Some(mut timestamp) = timestamp else {
            return ChapterDate::Missing;
        };
        if timestamp > MAX_SECONDS_TIMESTAMP {
            timestamp /= 1000;
        }

        match DateTime::from_timestamp(timestamp, 0) {
            Some(date) => ChapterDate::Parts([
                date.year(),
                date.month0() as i32,
                date.day() as i32,
                date.hour() as i32,
                date.minute() as i32,
                date.second() as i32,
            ]),
            None => ChapterDate::Missing,
        }
    }
}

impl Serialize for ChapterDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ChapterDate::Parts(parts) => parts.serialize(serializer),
            ChapterDate::Missing => serializer.serialize_str(NO_DATE),
        }
    }
}

/// Where a deep link or legacy identifier points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shortcut {
    Series {
        series: String,
    },
    Chapter {
        series: String,
        chapter: String,
        page: String,
    },
}
