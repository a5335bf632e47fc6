//! Quality selection, output naming, and the immutable per-download input.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Output template used when none (or a blank one) is supplied.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title).200s.%(ext)s";

/// Format selector used for unrecognized quality labels.
pub const FALLBACK_FORMAT_SELECTOR: &str = "best";

/// Requested download quality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Quality {
    /// Best video and best audio, merged.
    #[default]
    BestCombined,
    /// 1080p video plus best audio.
    P1080,
    /// 720p video plus best audio.
    P720,
    /// 480p video plus best audio.
    P480,
    /// Audio only, converted to MP3.
    AudioOnly,
    /// A label outside the fixed set; downloads with the fallback selector.
    Unrecognized(String),
}

impl Quality {
    /// The fixed set of selectable qualities.
    pub const CHOICES: [Self; 5] = [
        Self::BestCombined,
        Self::P1080,
        Self::P720,
        Self::P480,
        Self::AudioOnly,
    ];

    /// Label shown to the user and written to history records.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::BestCombined => "Best_Video+Audio",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::AudioOnly => "only_mp3",
            Self::Unrecognized(label) => label,
        }
    }

    /// Map a label to a quality, keeping unknown labels as
    /// [`Quality::Unrecognized`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        Self::CHOICES
            .into_iter()
            .find(|q| q.label().eq_ignore_ascii_case(trimmed))
            .unwrap_or_else(|| Self::Unrecognized(trimmed.to_string()))
    }

    /// Engine format-selection expression for this quality.
    #[must_use]
    pub const fn format_selector(&self) -> &'static str {
        match self {
            Self::BestCombined => "bestvideo+bestaudio/best",
            Self::P1080 => "bestvideo[height=1080]+bestaudio/best",
            Self::P720 => "bestvideo[height=720]+bestaudio/best",
            Self::P480 => "bestvideo[height=480]+bestaudio/best",
            Self::AudioOnly => "bestaudio",
            Self::Unrecognized(_) => FALLBACK_FORMAT_SELECTOR,
        }
    }

    /// Whether the download is converted to MP3.
    #[must_use]
    pub const fn is_audio_only(&self) -> bool {
        matches!(self, Self::AudioOnly)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Quality {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<Quality> for String {
    fn from(quality: Quality) -> Self {
        quality.label().to_string()
    }
}

impl FromStr for Quality {
    type Err = Error;

    /// Strict parse: only the fixed labels are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_label(s) {
            Self::Unrecognized(label) => Err(Error::Configuration(format!(
                "Unknown quality '{label}'; expected one of: {}",
                Self::CHOICES.map(|q| q.label().to_string()).join(", ")
            ))),
            quality => Ok(quality),
        }
    }
}

/// Trimmed template, or the default when blank.
#[must_use]
pub fn effective_template(template: &str) -> String {
    let trimmed = template.trim();
    if trimmed.is_empty() {
        DEFAULT_OUTPUT_TEMPLATE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Prefix a template with the zero-padded playlist position so output files
/// sort in playlist order.
#[must_use]
pub fn ordinal_template(base: &str, ordinal: usize, width: usize) -> String {
    format!("{ordinal:0width$} - {}", effective_template(base))
}

/// Immutable input for one download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    url: String,
    key: String,
    folder: PathBuf,
    quality: Quality,
    output_template: String,
}

impl TaskDescriptor {
    /// Create a descriptor. A blank template is replaced by the default.
    pub fn new(
        url: impl Into<String>,
        key: impl Into<String>,
        folder: impl Into<PathBuf>,
        quality: Quality,
        output_template: &str,
    ) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            folder: folder.into(),
            quality,
            output_template: effective_template(output_template),
        }
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Item key events are reported under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Destination folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Requested quality.
    #[must_use]
    pub const fn quality(&self) -> &Quality {
        &self.quality
    }

    /// Output naming template.
    #[must_use]
    pub fn output_template(&self) -> &str {
        &self.output_template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selectors() {
        assert_eq!(
            Quality::BestCombined.format_selector(),
            "bestvideo+bestaudio/best"
        );
        assert_eq!(
            Quality::P720.format_selector(),
            "bestvideo[height=720]+bestaudio/best"
        );
        assert_eq!(Quality::AudioOnly.format_selector(), "bestaudio");
    }

    #[test]
    fn test_unrecognized_label_falls_back() {
        let q = Quality::from_label("4k");
        assert_eq!(q, Quality::Unrecognized("4k".to_string()));
        assert_eq!(q.format_selector(), FALLBACK_FORMAT_SELECTOR);
        assert_eq!(q.label(), "4k");
    }

    #[test]
    fn test_labels_round_trip() {
        for q in Quality::CHOICES {
            assert_eq!(Quality::from_label(q.label()), q);
        }
        assert_eq!(Quality::from_label("ONLY_MP3"), Quality::AudioOnly);
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::P720);
        let err = "8k".parse::<Quality>().unwrap_err();
        assert!(err.to_string().contains("only_mp3"));
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&Quality::AudioOnly).unwrap();
        assert_eq!(json, "\"only_mp3\"");
        let q: Quality = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(q, Quality::Unrecognized("whatever".to_string()));
    }

    #[test]
    fn test_ordinal_template() {
        assert_eq!(
            ordinal_template("", 7, 2),
            "07 - %(title).200s.%(ext)s"
        );
        assert_eq!(ordinal_template(" %(id)s.%(ext)s ", 12, 3), "012 - %(id)s.%(ext)s");
    }

    #[test]
    fn test_descriptor_defaults_blank_template() {
        let d = TaskDescriptor::new("https://x/y", "k", "/tmp", Quality::P480, "   ");
        assert_eq!(d.output_template(), DEFAULT_OUTPUT_TEMPLATE);
        assert_eq!(d.key(), "k");
        assert_eq!(d.folder(), Path::new("/tmp"));
    }
}
