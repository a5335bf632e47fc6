//! ID3 tag reading and writing for downloaded MP3 files.
//!
//! [`read_raw_metadata`] collects whatever the engine embedded, which is the
//! input for metadata inference. [`embed_tags`] writes a cleaned
//! [`TagRecord`] back, replacing frames of the same kind.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use id3::frame::{Comment, ExtendedLink, Lyrics, Picture, PictureType, Popularimeter};
use id3::{Tag, TagLike, Version};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TagError;

/// Timeout for downloading cover art.
pub const COVER_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner recorded in the popularimeter frame.
const RATING_USER: &str = "user@example.com";

/// Description of the `WXXX` frame holding the source page.
const WEBSITE_DESCRIPTION: &str = "Website";

/// Raw metadata found in a file, keyed by frame ID.
///
/// `filename` carries the file stem so inference can fall back to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetadata {
    /// File name without extension.
    pub filename: String,
    /// Text content of each readable frame.
    pub frames: BTreeMap<String, String>,
}

/// Cleaned tag values to embed. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Track position, e.g. "5/12".
    pub track: Option<String>,
    /// Disc position, e.g. "1/2".
    pub disc: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub publisher: Option<String>,
    pub lyrics: Option<String>,
    pub comments: Option<String>,
    pub album_artist: Option<String>,
    pub bpm: Option<String>,
    pub key: Option<String>,
    pub isrc: Option<String>,
    pub encoder: Option<String>,
    pub original_date: Option<String>,
    pub copyright: Option<String>,
    pub website: Option<String>,
    /// Popularimeter rating, 0-255. Non-numeric values are ignored.
    pub rating: Option<String>,
    pub subtitle: Option<String>,
    /// Cover image URL, fetched and embedded as the front cover.
    pub cover_url: Option<String>,
}

impl TagRecord {
    /// A record holding only a title.
    pub fn title_only(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Text frames this record sets, as (frame ID, value) pairs.
    fn text_frames(&self) -> Vec<(&'static str, &str)> {
        [
            ("TIT2", &self.title),
            ("TPE1", &self.artist),
            ("TALB", &self.album),
            ("TRCK", &self.track),
            ("TPOS", &self.disc),
            ("TDRC", &self.year),
            ("TCON", &self.genre),
            ("TCOM", &self.composer),
            ("TPUB", &self.publisher),
            ("TPE2", &self.album_artist),
            ("TBPM", &self.bpm),
            ("TKEY", &self.key),
            ("TSRC", &self.isrc),
            ("TSSE", &self.encoder),
            ("TDOR", &self.original_date),
            ("TCOP", &self.copyright),
            ("TIT3", &self.subtitle),
        ]
        .into_iter()
        .filter_map(|(id, value)| non_empty(value.as_deref()).map(|v| (id, v)))
        .collect()
    }

    /// Parsed popularimeter rating, if present and numeric.
    #[must_use]
    pub fn rating_value(&self) -> Option<u8> {
        non_empty(self.rating.as_deref()).and_then(|r| r.parse::<u8>().ok())
    }

    /// Cover URL, if present.
    #[must_use]
    pub fn cover_url(&self) -> Option<&str> {
        non_empty(self.cover_url.as_deref())
    }

    /// Fill an empty title from the file name.
    pub fn ensure_title(&mut self, filename: &str) {
        if non_empty(self.title.as_deref()).is_none() {
            self.title = Some(filename.to_string());
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Whether `path` has an `.mp3` extension.
#[must_use]
pub fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
}

/// File name without extension.
#[must_use]
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read the frames currently present in an MP3 file.
///
/// A file without a tag yields empty frames rather than an error.
pub fn read_raw_metadata(path: &Path) -> Result<RawMetadata, TagError> {
    if !is_mp3(path) {
        return Err(TagError::NotMp3 {
            path: path.to_path_buf(),
        });
    }

    let mut raw = RawMetadata {
        filename: file_stem(path),
        frames: BTreeMap::new(),
    };

    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => {
            debug!("No ID3 tag found in: {}", path.display());
            return Ok(raw);
        }
        Err(e) => {
            return Err(TagError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    for frame in tag.frames() {
        if let Some(text) = frame.content().text() {
            raw.frames.insert(frame.id().to_string(), text.to_string());
        }
    }
    if let Some(comment) = tag.comments().next() {
        raw.frames
            .insert("COMM".to_string(), comment.text.clone());
    }
    if let Some(lyrics) = tag.lyrics().next() {
        raw.frames.insert("USLT".to_string(), lyrics.text.clone());
    }

    debug!(
        "Read {} raw frames from {}",
        raw.frames.len(),
        path.display()
    );
    Ok(raw)
}

/// Write `record` into the file's ID3 tag, creating the tag if needed.
///
/// `cover` is the already-fetched front cover image.
pub fn embed_tags(path: &Path, record: &TagRecord, cover: Option<Vec<u8>>) -> Result<(), TagError> {
    if !is_mp3(path) {
        return Err(TagError::NotMp3 {
            path: path.to_path_buf(),
        });
    }

    let mut tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => Tag::new(),
        Err(e) => {
            return Err(TagError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    for (id, value) in record.text_frames() {
        tag.set_text(id, value);
    }

    if let Some(text) = non_empty(record.lyrics.as_deref()) {
        tag.remove_all_lyrics();
        tag.add_frame(Lyrics {
            lang: "eng".to_string(),
            description: String::new(),
            text: text.to_string(),
        });
    }

    if let Some(text) = non_empty(record.comments.as_deref()) {
        tag.remove_comment(Some("desc"), None);
        tag.add_frame(Comment {
            lang: "eng".to_string(),
            description: "desc".to_string(),
            text: text.to_string(),
        });
    }

    if let Some(link) = non_empty(record.website.as_deref()) {
        let kept: Vec<ExtendedLink> = tag
            .extended_links()
            .filter(|l| l.description != WEBSITE_DESCRIPTION)
            .cloned()
            .collect();
        tag.remove("WXXX");
        for other in kept {
            tag.add_frame(other);
        }
        tag.add_frame(ExtendedLink {
            description: WEBSITE_DESCRIPTION.to_string(),
            link: link.to_string(),
        });
    }

    if let Some(rating) = record.rating_value() {
        tag.remove("POPM");
        tag.add_frame(Popularimeter {
            user: RATING_USER.to_string(),
            rating,
            counter: 0,
        });
    } else if record.rating.is_some() {
        debug!("Ignoring non-numeric rating {:?}", record.rating);
    }

    if let Some(data) = cover {
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type: "image/jpeg".to_string(),
            picture_type: PictureType::CoverFront,
            description: "Cover".to_string(),
            data,
        });
    }

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|e| TagError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    debug!("Embedded tags into {}", path.display());
    Ok(())
}

/// Download cover art bytes.
pub fn fetch_cover(url: &str, timeout: Duration) -> Result<Vec<u8>, TagError> {
    let failed = |reason: String| TagError::CoverFetchFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(format!("Failed to create HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|e| failed(e.to_string()))?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("image/") {
        warn!("Unexpected content type for cover art: {}", content_type);
    }

    let data = response.bytes().map_err(|e| failed(e.to_string()))?;
    if data.is_empty() {
        return Err(failed("Empty cover data".to_string()));
    }
    Ok(data.to_vec())
}
