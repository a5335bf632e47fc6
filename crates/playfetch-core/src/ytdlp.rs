//! `yt-dlp` adapter for the [`DownloadEngine`] interface.
//!
//! The executable is driven as a child process. Progress is read from
//! machine-readable lines produced by `--progress-template`, and failures are
//! classified from the `ERROR:` lines it writes to stderr. A cooperative abort
//! kills the child, leaving the partial file in place for a later
//! `--continue` run.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::{
    DEFAULT_SOCKET_TIMEOUT, DownloadEngine, EngineProgress, EngineRequest, ProgressHook,
    ProgressStatus,
};
use crate::error::EngineError;
use crate::item::{MediaEntry, MediaInfo, MediaKind};

/// Marker prefixing progress lines.
const PROGRESS_MARKER: &str = "[playfetch]";

/// Marker prefixing the final file path line.
const FINAL_PATH_MARKER: &str = "[playfetch-final]";

/// Template for `--progress-template`. The filename goes last because it
/// may contain spaces.
const PROGRESS_TEMPLATE: &str = "download:[playfetch] %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s %(progress.filename)s";

#[allow(clippy::expect_used)]
static EXTRACTOR_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ERROR: \[(?P<extractor>[^\]]+)\] (?P<message>.+)$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static GEO_RESTRICTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)geo[- ]?restrict|not available (in|from) your (country|location|region)")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static TIMEOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)timed out|timeout error|TimeoutError").expect("valid regex")
});

/// Configuration for the `yt-dlp` engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Directory containing ffmpeg, if not on `PATH`.
    pub ffmpeg_location: Option<PathBuf>,
    /// Socket timeout used for info fetching.
    pub socket_timeout: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

/// [`DownloadEngine`] backed by the `yt-dlp` executable.
#[derive(Debug, Clone, Default)]
pub struct YtDlpEngine {
    config: YtDlpConfig,
}

impl YtDlpEngine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub const fn with_config(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Report the installed engine version.
    pub fn version(&self) -> Result<String, EngineError> {
        let output = Command::new(&self.config.program)
            .arg("--version")
            .output()
            .map_err(|e| self.not_available(&e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    fn not_available(&self, error: &std::io::Error) -> EngineError {
        EngineError::NotAvailable {
            program: self.config.program.display().to_string(),
            reason: error.to_string(),
        }
    }

    fn spawn(&self, args: &[String]) -> Result<Child, EngineError> {
        debug!("Running {} {}", self.config.program.display(), args.join(" "));
        Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.not_available(&e))
    }

    /// Command-line arguments for a download request.
    #[must_use]
    pub fn download_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "--newline",
            "--no-colors",
            "--no-playlist",
            "--progress",
            "--no-simulate",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--print",
            "after_move:[playfetch-final] %(filepath)s",
            "--restrict-filenames",
            "--windows-filenames",
            "--no-mtime",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend([
            "-f".to_string(),
            request.format.clone(),
            "-P".to_string(),
            format!("home:{}", request.folder.display()),
            "-o".to_string(),
            request.output_template.clone(),
            "--socket-timeout".to_string(),
            request.socket_timeout.as_secs().max(1).to_string(),
            if request.continue_partial {
                "--continue".to_string()
            } else {
                "--no-continue".to_string()
            },
        ]);

        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.display().to_string());
        }

        if request.extract_audio {
            args.extend(
                [
                    "--extract-audio",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "192K",
                    "--embed-metadata",
                    "--embed-thumbnail",
                ]
                .map(String::from),
            );
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }

    fn info_args(&self, url: &str) -> Vec<String> {
        vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout.as_secs().max(1).to_string(),
            "--".to_string(),
            url.to_string(),
        ]
    }
}

/// Collect stderr on a helper thread so a chatty child never blocks on a
/// full pipe while stdout is being read.
fn drain_stderr(child: &mut Child) -> std::thread::JoinHandle<String> {
    let stderr = child.stderr.take();
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut stderr) = stderr
            && let Err(e) = stderr.read_to_string(&mut buffer)
        {
            warn!("Failed to read engine stderr: {}", e);
        }
        buffer
    })
}

/// Kill the child and reap it.
fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to stop engine process: {}", e);
    }
    match child.wait() {
        Ok(status) => debug!("Engine process stopped: {}", status),
        Err(e) => warn!("Failed to reap engine process: {}", e),
    }
}

impl DownloadEngine for YtDlpEngine {
    fn fetch_info(&self, url: &str) -> Result<MediaInfo, EngineError> {
        info!("Fetching info for {}", url);
        let mut child = self.spawn(&self.info_args(url))?;
        let stderr = drain_stderr(&mut child);

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .map_err(|e| EngineError::Other(format!("Failed to read engine output: {e}")))?;
        }
        let status = child
            .wait()
            .map_err(|e| EngineError::Other(format!("Failed to wait for engine: {e}")))?;
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(classify_stderr(&stderr));
        }
        parse_info_json(&stdout)
    }

    fn download(
        &self,
        request: &EngineRequest,
        on_progress: &mut ProgressHook<'_>,
    ) -> Result<Option<PathBuf>, EngineError> {
        let mut child = self.spawn(&self.download_args(request))?;
        let stderr = drain_stderr(&mut child);
        let mut final_path = None;

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        stop_child(&mut child);
                        drop(stderr);
                        return Err(EngineError::Other(format!(
                            "Failed to read engine output: {e}"
                        )));
                    }
                }
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\r', '\n']);

                if let Some(path) = line.strip_prefix(FINAL_PATH_MARKER) {
                    final_path = Some(PathBuf::from(path.trim()));
                    continue;
                }
                let Some(progress) = parse_progress_line(line) else {
                    continue;
                };
                if let Err(abort) = on_progress(&progress) {
                    debug!("Progress hook aborted download of {}", request.url);
                    stop_child(&mut child);
                    // Grandchildren (ffmpeg) may still hold the pipe; don't wait on it.
                    drop(stderr);
                    return Err(abort);
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| EngineError::Other(format!("Failed to wait for engine: {e}")))?;
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(final_path)
        } else {
            Err(classify_stderr(&stderr))
        }
    }
}

/// Parse one `--progress-template` line.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<EngineProgress> {
    let rest = line.trim_start().strip_prefix(PROGRESS_MARKER)?.trim_start();
    let mut fields = rest.splitn(5, ' ');

    let status = match fields.next()? {
        "downloading" => ProgressStatus::Downloading,
        "finished" => ProgressStatus::Finished,
        _ => return None,
    };
    let downloaded_bytes = fields.next().and_then(parse_bytes).unwrap_or(0);
    let total_bytes = fields.next().and_then(parse_bytes);
    let total_bytes_estimate = fields.next().and_then(parse_bytes);
    let filename = fields
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "NA")
        .map(String::from);

    Some(EngineProgress {
        status,
        downloaded_bytes,
        total_bytes,
        total_bytes_estimate,
        filename,
    })
}

/// Byte counts are integers, estimates may be fractional, "NA" means unknown.
fn parse_bytes(field: &str) -> Option<u64> {
    field
        .parse::<u64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

/// Classify engine stderr into a typed failure.
///
/// Geo-restriction wins over the other classes because those messages are
/// also reported with an extractor prefix.
#[must_use]
pub fn classify_stderr(stderr: &str) -> EngineError {
    let error_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR:"));

    let Some(line) = error_line else {
        let last = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty());
        return EngineError::Other(
            last.map_or_else(|| "engine exited with an error".to_string(), String::from),
        );
    };

    if GEO_RESTRICTION.is_match(line) {
        return EngineError::GeoRestricted(strip_error_prefix(line));
    }
    if TIMEOUT.is_match(line) {
        return EngineError::Timeout;
    }
    if let Some(captures) = EXTRACTOR_ERROR.captures(line) {
        return EngineError::Extractor(format!(
            "[{}] {}",
            &captures["extractor"], &captures["message"]
        ));
    }
    if line.contains("Unsupported URL") {
        return EngineError::Extractor(strip_error_prefix(line));
    }
    EngineError::Download(strip_error_prefix(line))
}

fn strip_error_prefix(line: &str) -> String {
    line.trim_start_matches("ERROR:").trim().to_string()
}

/// Parse `--flat-playlist --dump-single-json` output.
pub fn parse_info_json(json: &str) -> Result<MediaInfo, EngineError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| EngineError::Other(format!("Unable to parse engine info: {e}")))?;
    if value.is_null() {
        return Err(EngineError::Other(
            "Unable to fetch info. The URL may be empty or unavailable.".to_string(),
        ));
    }

    let text = |v: &Value, field: &str| v.get(field).and_then(Value::as_str).map(String::from);
    let title = text(&value, "title");
    let uploader = text(&value, "uploader").or_else(|| text(&value, "channel"));

    if let Some(entries) = value.get("entries").and_then(Value::as_array) {
        let entries: Vec<MediaEntry> = entries
            .iter()
            .filter(|entry| !entry.is_null())
            .map(|entry| MediaEntry {
                id: text(entry, "id"),
                url: text(entry, "url"),
                webpage_url: text(entry, "webpage_url"),
                title: text(entry, "title"),
            })
            .collect();
        let reported_count = value
            .get("playlist_count")
            .and_then(Value::as_u64)
            .map(|c| c as usize);
        return Ok(MediaInfo {
            kind: MediaKind::Playlist,
            title,
            uploader,
            reported_count,
            entries,
        });
    }

    let entry = MediaEntry {
        id: text(&value, "id"),
        url: text(&value, "webpage_url").or_else(|| text(&value, "original_url")),
        webpage_url: text(&value, "webpage_url"),
        title: title.clone(),
    };
    Ok(MediaInfo {
        kind: MediaKind::SingleVideo,
        title,
        uploader,
        reported_count: Some(1),
        entries: vec![entry],
    })
}
