//! LLM-assisted metadata cleanup and the MP3 tagging post-step.
//!
//! A [`MetadataInferrer`] turns the raw frames of a freshly converted MP3
//! into a cleaned [`TagRecord`]. The [`Tagger`] runs inference, falls back to
//! a title-only record when inference fails, and embeds the result.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{InferenceError, TagError};
use crate::metadata::{
    COVER_FETCH_TIMEOUT, RawMetadata, TagRecord, embed_tags, fetch_cover, file_stem,
    read_raw_metadata,
};

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Environment variable holding the API key.
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Fields the model is asked to fill, in prompt order.
const TAG_FIELDS: [&str; 22] = [
    "title",
    "artist",
    "album",
    "track",
    "disc",
    "year",
    "genre",
    "composer",
    "publisher",
    "lyrics",
    "comments",
    "album_artist",
    "bpm",
    "key",
    "isrc",
    "encoder",
    "original_date",
    "copyright",
    "website",
    "rating",
    "subtitle",
    "cover_url",
];

/// Turns raw metadata into a cleaned tag record.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataInferrer: Send + Sync {
    /// Infer cleaned tags from raw metadata.
    fn infer(&self, raw: &RawMetadata) -> Result<TagRecord, InferenceError>;
}

/// Settings for the Gemini-backed inferrer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Whether MP3 downloads are retagged at all.
    pub enabled: bool,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token limit.
    pub max_output_tokens: u32,
    /// Environment variable the API key is read from.
    pub api_key_env: String,
    /// API base URL.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            max_output_tokens: 1024,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// [`MetadataInferrer`] calling the Gemini `generateContent` REST API.
#[derive(Debug)]
pub struct GeminiInferrer {
    config: InferenceConfig,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl GeminiInferrer {
    /// Create an inferrer, reading the API key from the configured
    /// environment variable.
    pub fn from_env(config: InferenceConfig) -> Result<Self, InferenceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(InferenceError::MissingApiKey)?;
        Self::new(config, api_key)
    }

    /// Create an inferrer with an explicit API key.
    ///
    /// Builds a blocking HTTP client, so call this outside async contexts
    /// (e.g. from `spawn_blocking`).
    pub fn new(config: InferenceConfig, api_key: impl Into<String>) -> Result<Self, InferenceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| InferenceError::Connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key: api_key.into(),
            client,
        })
    }

    fn generate(&self, prompt: String) -> Result<String, InferenceError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
            self.api_key
        );
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        debug!("Requesting metadata inference from model {}", self.config.model);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| InferenceError::Connection(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GeminiResponse = response
            .json()
            .map_err(|e| InferenceError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| InferenceError::InvalidResponse("No candidates returned".to_string()))
    }
}

impl MetadataInferrer for GeminiInferrer {
    fn infer(&self, raw: &RawMetadata) -> Result<TagRecord, InferenceError> {
        let text = self.generate(build_prompt(raw))?;
        parse_tag_record(&text)
    }
}

/// Prompt asking the model for a cleaned JSON tag record.
#[must_use]
pub fn build_prompt(raw: &RawMetadata) -> String {
    let metadata = serde_json::to_string_pretty(raw).unwrap_or_default();
    let fields = TAG_FIELDS.join(", ");
    format!(
        "Given the raw MP3 metadata, return a cleaned JSON.\n\
         - All fields must exist.\n\
         - If unknown, use \"\" (empty string) instead of null.\n\
         - \"title\" must never be empty; if unavailable, use the filename without extension.\n\
         \n\
         Raw metadata:\n{metadata}\n\
         \n\
         Return ONLY a JSON object with these string fields: {fields}"
    )
}

/// Parse a model reply into a tag record.
///
/// Tolerates prose or code fences around the object, numbers in place of
/// strings, and nulls.
pub fn parse_tag_record(text: &str) -> Result<TagRecord, InferenceError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(InferenceError::InvalidResponse(format!(
                "No JSON object in response: {text}"
            )));
        }
    };

    let value: Value = serde_json::from_str(json)
        .map_err(|e| InferenceError::InvalidResponse(format!("Malformed JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(InferenceError::InvalidResponse(
            "Response is not a JSON object".to_string(),
        ));
    };

    let normalized: serde_json::Map<String, Value> = map
        .into_iter()
        .filter_map(|(field, value)| match value {
            Value::String(s) => Some((field, Value::String(s))),
            Value::Number(n) => Some((field, Value::String(n.to_string()))),
            _ => None,
        })
        .collect();

    serde_json::from_value(Value::Object(normalized))
        .map_err(|e| InferenceError::InvalidResponse(e.to_string()))
}

/// How a file was tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    /// Inferred tags were embedded.
    Inferred,
    /// Inference was unavailable or failed; only the title was embedded.
    Fallback(String),
}

/// Tagging post-step for MP3 downloads.
#[derive(Clone)]
pub struct Tagger {
    inferrer: Option<Arc<dyn MetadataInferrer>>,
    cover_timeout: Duration,
}

impl std::fmt::Debug for Tagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tagger")
            .field("inference", &self.inferrer.is_some())
            .field("cover_timeout", &self.cover_timeout)
            .finish()
    }
}

impl Tagger {
    /// Tagger using `inferrer`, or title-only tags when `None`.
    #[must_use]
    pub fn new(inferrer: Option<Arc<dyn MetadataInferrer>>) -> Self {
        Self {
            inferrer,
            cover_timeout: COVER_FETCH_TIMEOUT,
        }
    }

    /// Build a tagger from configuration. A missing API key degrades to
    /// title-only tagging. Blocking; see [`GeminiInferrer::new`].
    #[must_use]
    pub fn from_config(config: &InferenceConfig) -> Self {
        let inferrer = match GeminiInferrer::from_env(config.clone()) {
            Ok(inferrer) => Some(Arc::new(inferrer) as Arc<dyn MetadataInferrer>),
            Err(e) => {
                warn!("Metadata inference disabled: {}", e);
                None
            }
        };
        Self::new(inferrer)
    }

    /// Retag an MP3 file.
    pub fn tag_file(&self, path: &Path) -> Result<TagOutcome, TagError> {
        let raw = read_raw_metadata(path)?;
        let filename = file_stem(path);

        let inferred = match &self.inferrer {
            Some(inferrer) => inferrer.infer(&raw).map_err(|e| e.to_string()),
            None => Err("metadata inference not configured".to_string()),
        };

        match inferred {
            Ok(mut record) => {
                record.ensure_title(&filename);
                let cover = record.cover_url().and_then(|url| {
                    fetch_cover(url, self.cover_timeout)
                        .inspect_err(|e| warn!("Failed to add cover art: {}", e))
                        .ok()
                });
                embed_tags(path, &record, cover)?;
                info!("Tagged: {}", filename);
                Ok(TagOutcome::Inferred)
            }
            Err(reason) => {
                embed_tags(path, &TagRecord::title_only(&filename), None)?;
                info!("Fallback tagging applied to {}: {}", filename, reason);
                Ok(TagOutcome::Fallback(reason))
            }
        }
    }
}
