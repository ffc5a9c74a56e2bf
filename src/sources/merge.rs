//! Folding of per-group chapter records into one entry per chapter number.
//!
//! Upstream feeds list every group's release separately. The resolver keys them
//! by chapter number, so translations of the same chapter end up as siblings
//! under one [`ChapterEntry`].

use crate::models::{ChapterDate, ChapterEntry, ChapterReference, ChapterRow, MULTIPLE_GROUPS};
use std::collections::BTreeMap;

/// A single upstream release, already attributed to a group index.
#[derive(Debug, Clone)]
pub struct UpstreamChapter {
    pub number: Option<String>,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub group: String,
    pub reference: ChapterReference,
    pub timestamp: Option<i64>,
}

/// Accumulates releases for one resolve call.
#[derive(Debug, Default)]
pub struct MergeResolver {
    chapters: BTreeMap<String, ChapterEntry>,
    oneshots: u32,
}

impl MergeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a release and returns the chapter number it was filed under.
    ///
    /// Releases without a number get `0.<n>`, counting oneshots in arrival order.
    pub fn add(&mut self, release: UpstreamChapter) -> String {
        let number = match release.number.filter(|n| !n.trim().is_empty()) {
            Some(number) => number,
            None => {
                let synthetic = format!("0.{}", self.oneshots);
                self.oneshots += 1;
                synthetic
            }
        };

        let title = release.title.unwrap_or_default();
        let volume = release.volume.unwrap_or_default();

        let entry = self
            .chapters
            .entry(number.clone())
            .or_insert_with(|| ChapterEntry {
                volume: String::new(),
                title: String::new(),
                groups: BTreeMap::new(),
                release_date: BTreeMap::new(),
                last_updated: None,
            });

        if entry.title.is_empty() {
            entry.title = title;
        }
        if entry.volume.is_empty() {
            entry.volume = volume;
        }
        entry.last_updated = match (entry.last_updated, release.timestamp) {
            (Some(current), Some(new)) => Some(current.max(new)),
            (current, new) => current.or(new),
        };
        entry
            .groups
            .insert(release.group.clone(), release.reference);
        entry.release_date.insert(release.group, release.timestamp);

        number
    }

    pub fn finish(self) -> BTreeMap<String, ChapterEntry> {
        self.chapters
    }
}

/// Numeric ordering key for a chapter number.
///
/// The first two dot-separated segments form the integer and fractional part;
/// digits of any further segments are appended to the fraction, so "21.15.1"
/// orders as 21.151. Unparseable numbers sort below everything else.
pub fn chapter_sort_key(number: &str) -> f64 {
    let mut segments = number.split('.');
    let head: Vec<&str> = segments.by_ref().take(2).collect();
    let tail: String = segments
        .flat_map(str::chars)
        .filter(char::is_ascii_digit)
        .collect();

    let mut key = head.join(".");
    key.push_str(&tail);

    key.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(f64::NEG_INFINITY)
}

/// Chapter numbers ordered newest first.
pub fn sorted_numbers<V>(chapters: &BTreeMap<String, V>) -> Vec<&str> {
    let mut numbers: Vec<&str> = chapters.keys().map(String::as_str).collect();
    numbers.sort_by(|a, b| chapter_sort_key(b).total_cmp(&chapter_sort_key(a)));
    numbers
}

/// Builds the chapter table for a series page, newest first.
pub fn chapter_rows(
    chapters: &BTreeMap<String, ChapterEntry>,
    groups: &BTreeMap<String, String>,
    volume_fallback: &str,
) -> Vec<ChapterRow> {
    sorted_numbers(chapters)
        .into_iter()
        .map(|number| {
            let entry = &chapters[number];
            let group_label = if entry.groups.len() > 1 {
                MULTIPLE_GROUPS.to_string()
            } else {
                entry
                    .groups
                    .keys()
                    .next()
                    .map(|index| groups.get(index).cloned().unwrap_or_else(|| index.clone()))
                    .unwrap_or_default()
            };
            let volume = if entry.volume.is_empty() {
                volume_fallback.to_string()
            } else {
                entry.volume.clone()
            };

            ChapterRow {
                number: number.to_string(),
                display_number: number.to_string(),
                title: entry.title.clone(),
                slug_number: number.replace('.', "-"),
                group_label,
                date: ChapterDate::from_timestamp(entry.last_updated),
                volume,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    fn release(number: &str, group: &str, id: &str, timestamp: i64) -> UpstreamChapter {
        UpstreamChapter {
            number: Some(number.to_string()),
            title: None,
            volume: None,
            group: group.to_string(),
            reference: ChapterReference::new(SourceKind::MangaDex, id),
            timestamp: Some(timestamp),
        }
    }

    #[test]
    fn test_same_number_from_two_groups_is_merged() {
        let mut resolver = MergeResolver::new();
        resolver.add(release("5", "1", "a", 100));
        resolver.add(release("5", "2", "b", 200));

        let chapters = resolver.finish();
        assert_eq!(chapters.len(), 1);

        let entry = &chapters["5"];
        assert_eq!(entry.groups.len(), 2);
        assert_eq!(entry.groups["1"].id, "a");
        assert_eq!(entry.groups["2"].id, "b");
        assert_eq!(entry.release_date["1"], Some(100));
        assert_eq!(entry.release_date["2"], Some(200));
        assert_eq!(entry.last_updated, Some(200));
    }

    #[test]
    fn test_last_updated_is_max_regardless_of_order() {
        let mut resolver = MergeResolver::new();
        resolver.add(release("5", "2", "b", 200));
        resolver.add(release("5", "1", "a", 100));

        assert_eq!(resolver.finish()["5"].last_updated, Some(200));
    }

    #[test]
    fn test_first_non_empty_title_and_volume_win() {
        let mut resolver = MergeResolver::new();
        let mut first = release("3", "1", "a", 1);
        first.title = Some(String::new());
        let mut second = release("3", "2", "b", 2);
        second.title = Some("The Return".to_string());
        second.volume = Some("1".to_string());
        let mut third = release("3", "3", "c", 3);
        third.title = Some("Other".to_string());
        third.volume = Some("2".to_string());

        resolver.add(first);
        resolver.add(second);
        resolver.add(third);

        let entry = &resolver.finish()["3"];
        assert_eq!(entry.title, "The Return");
        assert_eq!(entry.volume, "1");
    }

    #[test]
    fn test_oneshots_get_sequential_keys() {
        let mut resolver = MergeResolver::new();
        let mut a = release("", "1", "a", 1);
        a.number = None;
        let b = release("", "1", "b", 2);

        assert_eq!(resolver.add(a), "0.0");
        assert_eq!(resolver.add(b), "0.1");
        assert_eq!(resolver.add(release("1", "1", "c", 3)), "1");

        let chapters = resolver.finish();
        assert_eq!(chapters["0.0"].groups["1"].id, "a");
        assert_eq!(chapters["0.1"].groups["1"].id, "b");
    }

    #[test]
    fn test_sort_key_handles_extra_dots() {
        assert_eq!(chapter_sort_key("21.15.1"), 21.151);
        assert_eq!(chapter_sort_key("2.5"), 2.5);
        assert_eq!(chapter_sort_key("10"), 10.0);
        assert_eq!(chapter_sort_key("Extra"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_sorted_numbers_descending() {
        let chapters: BTreeMap<String, ()> = ["1", "10", "2.5", "21.15.1"]
            .into_iter()
            .map(|n| (n.to_string(), ()))
            .collect();

        assert_eq!(sorted_numbers(&chapters), vec!["21.15.1", "10", "2.5", "1"]);
    }

    #[test]
    fn test_rows_label_multiple_groups() {
        let mut resolver = MergeResolver::new();
        resolver.add(release("1", "1", "a", 100));
        resolver.add(release("2", "1", "b", 200));
        resolver.add(release("2", "2", "c", 300));
        let chapters = resolver.finish();
        let groups: BTreeMap<String, String> = [
            ("1".to_string(), "Alpha Scans".to_string()),
            ("2".to_string(), "Beta Scans".to_string()),
        ]
        .into_iter()
        .collect();

        let rows = chapter_rows(&chapters, &groups, "Unknown");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, "2");
        assert_eq!(rows[0].group_label, MULTIPLE_GROUPS);
        assert_eq!(rows[1].group_label, "Alpha Scans");
        assert_eq!(rows[1].volume, "Unknown");
    }

    #[test]
    fn test_row_slug_replaces_dots() {
        let mut resolver = MergeResolver::new();
        resolver.add(release("21.15.1", "1", "a", 100));
        let rows = chapter_rows(&resolver.finish(), &BTreeMap::new(), "Unknown");
        assert_eq!(rows[0].slug_number, "21-15-1");
        assert_eq!(rows[0].group_label, "1");
    }
}
