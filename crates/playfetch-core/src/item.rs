//! Fetched entries, item keys, and the per-item progress registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One playlist entry (or the single video) as reported by the engine's flat
/// extraction. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    /// Stable video identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// URL or bare video id, depending on the extractor.
    #[serde(default)]
    pub url: Option<String>,
    /// Full watch page URL.
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Video title.
    #[serde(default)]
    pub title: Option<String>,
}

impl MediaEntry {
    /// Create an entry with only an identifier and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Fill in `webpage_url` from `url`.
    ///
    /// Flat playlist extraction often reports a bare video id in `url`; those
    /// are expanded to a watch URL.
    pub fn normalize(&mut self) {
        let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };
        if !url.contains("http") {
            self.webpage_url = Some(format!("https://www.youtube.com/watch?v={url}"));
        } else if self.webpage_url.is_none() {
            self.webpage_url = Some(url.to_string());
        }
    }

    /// The URL handed to the engine, if the entry has one.
    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.webpage_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// Derive the item key of an entry.
///
/// Tries the video id, the URL, the watch page URL and the title in that
/// order, taking the first non-blank one. Entries with none of them get
/// `entry-<ordinal>`, which is distinct for distinct positions.
#[must_use]
pub fn derive_item_key(entry: &MediaEntry, ordinal: usize) -> String {
    [
        entry.id.as_deref(),
        entry.url.as_deref(),
        entry.webpage_url.as_deref(),
        entry.title.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|candidate| !candidate.is_empty())
    .map_or_else(|| format!("entry-{ordinal}"), str::to_string)
}

/// Whether fetched info describes a playlist or a single video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A playlist with zero or more entries.
    Playlist,
    /// A single video, represented as one entry.
    SingleVideo,
}

/// Result of fetching info for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Playlist or single video.
    pub kind: MediaKind,
    /// Playlist or video title.
    pub title: Option<String>,
    /// Channel/uploader name.
    pub uploader: Option<String>,
    /// Playlist size as reported by the site (may differ from `entries.len()`).
    pub reported_count: Option<usize>,
    /// Entries in playlist order.
    pub entries: Vec<MediaEntry>,
}

impl MediaInfo {
    /// Human-readable multi-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let title = self.title.as_deref().unwrap_or("N/A");
        let uploader = self.uploader.as_deref().unwrap_or("N/A");
        match self.kind {
            MediaKind::Playlist => format!(
                "Type: Playlist\nTitle: {title}\nVideos: {}\nUploader: {uploader}",
                self.reported_count.unwrap_or(self.entries.len())
            ),
            MediaKind::SingleVideo => {
                format!("Type: Single Video\nTitle: {title}\nUploader: {uploader}")
            }
        }
    }
}

/// Progress and selection state of one fetched entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    /// Item key, unique within the registry.
    pub key: String,
    /// 1-based position in the fetched playlist.
    pub ordinal: usize,
    /// Display title.
    pub title: String,
    /// URL handed to the engine.
    pub url: Option<String>,
    /// Last reported progress, 0-100.
    pub percent: u8,
    /// Whether the item is checked for download.
    pub selected: bool,
}

/// Ordered registry of fetched items, keyed by item key.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    items: Vec<ItemState>,
    index: HashMap<String, usize>,
}

impl ItemRegistry {
    /// Build a registry from fetched entries.
    ///
    /// Entries are normalized, keyed, and selected by default. A key that
    /// collides with an earlier one gets a `#<n>` suffix.
    #[must_use]
    pub fn from_entries(entries: Vec<MediaEntry>) -> Self {
        let mut registry = Self::default();
        for (position, mut entry) in entries.into_iter().enumerate() {
            let ordinal = position + 1;
            entry.normalize();

            let base = derive_item_key(&entry, ordinal);
            let mut key = base.clone();
            let mut suffix = 2;
            while registry.index.contains_key(&key) {
                key = format!("{base}#{suffix}");
                suffix += 1;
            }
            if key != base {
                debug!("Duplicate item key '{}' renamed to '{}'", base, key);
            }

            let title = entry
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("Video {ordinal}"));

            registry.index.insert(key.clone(), registry.items.len());
            registry.items.push(ItemState {
                key,
                ordinal,
                title,
                url: entry.download_url().map(str::to_string),
                percent: 0,
                selected: true,
            });
        }
        registry
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in playlist order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemState> {
        self.items.iter()
    }

    /// Look up an item by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ItemState> {
        self.index.get(key).map(|&i| &self.items[i])
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut ItemState> {
        self.index.get(key).map(|&i| &mut self.items[i])
    }

    /// Record progress for an item. Returns false for unknown keys.
    pub fn set_progress(&mut self, key: &str, percent: u8) -> bool {
        self.get_mut(key).is_some_and(|item| {
            item.percent = percent.min(100);
            true
        })
    }

    /// Check or uncheck an item. Returns false for unknown keys.
    pub fn set_selected(&mut self, key: &str, selected: bool) -> bool {
        self.get_mut(key).is_some_and(|item| {
            item.selected = selected;
            true
        })
    }

    /// Deselect everything if all items are selected, otherwise select all.
    ///
    /// Returns the new selection state.
    pub fn toggle_select_all(&mut self) -> bool {
        let new_state = !self.items.iter().all(|item| item.selected);
        for item in &mut self.items {
            item.selected = new_state;
        }
        new_state
    }

    /// Selected items that have a downloadable URL.
    #[must_use]
    pub fn selected(&self) -> Vec<&ItemState> {
        self.items
            .iter()
            .filter(|item| item.selected && item.url.is_some())
            .collect()
    }

    /// Selected items whose recorded progress is below 100.
    #[must_use]
    pub fn incomplete_selected(&self) -> Vec<&ItemState> {
        self.selected()
            .into_iter()
            .filter(|item| item.percent < 100)
            .collect()
    }

    /// Items whose display label contains `text`, case-insensitively.
    #[must_use]
    pub fn filter(&self, text: &str) -> Vec<&ItemState> {
        let needle = text.trim().to_lowercase();
        self.items
            .iter()
            .filter(|item| {
                format!("{}. {}", item.ordinal, item.title)
                    .to_lowercase()
                    .contains(&needle)
            })
            .collect()
    }

    /// Reset progress of the selected items to 0.
    pub fn reset_selected_progress(&mut self) {
        for item in self.items.iter_mut().filter(|item| item.selected) {
            item.percent = 0;
        }
    }

    /// Digits used for the ordinal prefix of output names.
    #[must_use]
    pub fn ordinal_width(&self) -> usize {
        self.items.len().to_string().len().max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: Option<&str>, url: Option<&str>, title: Option<&str>) -> MediaEntry {
        MediaEntry {
            id: id.map(String::from),
            url: url.map(String::from),
            webpage_url: None,
            title: title.map(String::from),
        }
    }

    mod key_derivation_tests {
        use super::*;

        #[test]
        fn test_prefers_identifier() {
            let e = entry(Some("abc123"), Some("https://x/y"), Some("Song"));
            assert_eq!(derive_item_key(&e, 1), "abc123");
        }

        #[test]
        fn test_falls_back_to_url() {
            let e = entry(None, Some("https://x/y"), Some("Song"));
            assert_eq!(derive_item_key(&e, 1), "https://x/y");
        }

        #[test]
        fn test_falls_back_to_webpage_url_then_title() {
            let mut e = entry(None, None, Some("Song"));
            assert_eq!(derive_item_key(&e, 1), "Song");

            e.webpage_url = Some("https://www.youtube.com/watch?v=q".to_string());
            assert_eq!(derive_item_key(&e, 1), "https://www.youtube.com/watch?v=q");
        }

        #[test]
        fn test_blank_fields_are_skipped() {
            let e = entry(Some("  "), Some(""), Some("Song"));
            assert_eq!(derive_item_key(&e, 1), "Song");
        }

        #[test]
        fn test_fallback_is_non_empty_and_distinct() {
            let a = derive_item_key(&MediaEntry::default(), 1);
            let b = derive_item_key(&MediaEntry::default(), 2);
            assert!(!a.is_empty());
            assert!(!b.is_empty());
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_normalize_expands_bare_ids() {
        let mut e = entry(Some("dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"), None);
        e.normalize();
        assert_eq!(
            e.download_url(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_normalize_copies_full_urls() {
        let mut e = entry(None, Some("https://vimeo.com/1"), None);
        e.normalize();
        assert_eq!(e.webpage_url.as_deref(), Some("https://vimeo.com/1"));
    }

    #[test]
    fn test_registry_disambiguates_duplicate_keys() {
        let registry = ItemRegistry::from_entries(vec![
            entry(None, None, Some("Same")),
            entry(None, None, Some("Same")),
        ]);
        let keys: Vec<_> = registry.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["Same", "Same#2"]);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ItemRegistry::from_entries(vec![
            entry(Some("a"), Some("a"), Some("First")),
            entry(Some("b"), None, None),
        ]);
        let a = registry.get("a").unwrap();
        assert_eq!(a.ordinal, 1);
        assert!(a.selected);
        assert_eq!(a.percent, 0);

        let b = registry.get("b").unwrap();
        assert_eq!(b.title, "Video 2");
        assert!(b.url.is_none());
        // Not downloadable, so never part of the selection
        assert_eq!(registry.selected().len(), 1);
    }

    #[test]
    fn test_toggle_select_all() {
        let mut registry = ItemRegistry::from_entries(vec![
            entry(Some("a"), Some("a"), None),
            entry(Some("b"), Some("b"), None),
        ]);
        assert!(!registry.toggle_select_all());
        assert!(registry.selected().is_empty());

        registry.set_selected("a", true);
        assert!(registry.toggle_select_all());
        assert_eq!(registry.selected().len(), 2);
    }

    #[test]
    fn test_incomplete_selected_excludes_finished() {
        let mut registry = ItemRegistry::from_entries(vec![
            entry(Some("a"), Some("a"), None),
            entry(Some("b"), Some("b"), None),
            entry(Some("c"), Some("c"), None),
        ]);
        registry.set_progress("a", 100);
        registry.set_progress("b", 42);
        registry.set_selected("c", false);

        let keys: Vec<_> = registry
            .incomplete_selected()
            .iter()
            .map(|i| i.key.clone())
            .collect();
        assert_eq!(keys, vec!["b"]);
    }

    #[test]
    fn test_filter_matches_label() {
        let registry = ItemRegistry::from_entries(vec![
            entry(Some("a"), Some("a"), Some("Intro Theme")),
            entry(Some("b"), Some("b"), Some("Outro")),
        ]);
        assert_eq!(registry.filter("theme").len(), 1);
        assert_eq!(registry.filter("2.").len(), 1);
        assert_eq!(registry.filter("").len(), 2);
    }

    #[test]
    fn test_ordinal_width() {
        let small = ItemRegistry::from_entries(vec![MediaEntry::default(); 3]);
        assert_eq!(small.ordinal_width(), 2);
        let large = ItemRegistry::from_entries(vec![MediaEntry::default(); 120]);
        assert_eq!(large.ordinal_width(), 3);
    }

    #[test]
    fn test_summary() {
        let info = MediaInfo {
            kind: MediaKind::Playlist,
            title: Some("Mix".to_string()),
            uploader: None,
            reported_count: Some(12),
            entries: vec![],
        };
        assert!(info.summary().contains("Videos: 12"));
        assert!(info.summary().contains("Uploader: N/A"));
    }
}
