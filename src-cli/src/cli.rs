//! Command-line arguments.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use playfetch_core::{AbortPrecedence, AppConfig, Coordinator, ItemState, Quality};

/// Download a playlist or video with concurrent, pausable downloads.
///
/// While downloads run, type `p` to pause, `r` to resume, `c` to cancel,
/// `s` for a progress summary and `q` to cancel and quit. Ctrl-C cancels.
#[derive(Debug, Parser)]
#[command(name = "playfetch", version, about, long_about)]
pub struct Cli {
    /// Playlist or video URL.
    pub url: String,

    /// Destination folder [default: configured download folder].
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// Quality: Best_Video+Audio, 1080p, 720p, 480p or only_mp3.
    #[arg(short, long, value_parser = parse_quality)]
    pub quality: Option<Quality>,

    /// Concurrent downloads (1-8).
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Output template for file names.
    #[arg(short = 'o', long)]
    pub template: Option<String>,

    /// Only download these playlist positions (e.g. `1,3,7`).
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<usize>,

    /// Skip these playlist positions.
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<usize>,

    /// Only download items whose title contains this text.
    #[arg(long)]
    pub filter: Option<String>,

    /// Tag MP3 downloads using metadata inference (needs GOOGLE_API_KEY).
    #[arg(long)]
    pub tag: bool,

    /// Report "Cancelled." rather than "Paused." when both were requested.
    #[arg(long)]
    pub cancel_first: bool,

    /// Path to the yt-dlp executable.
    #[arg(long)]
    pub ytdlp: Option<PathBuf>,

    /// Configuration file [default: platform config directory].
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List the fetched items and exit.
    #[arg(short, long)]
    pub list: bool,

    /// Log more to the console (repeat for more detail).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Override configuration values given on the command line.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(folder) = &self.folder {
            config.download_folder.clone_from(folder);
        }
        if let Some(quality) = &self.quality {
            config.quality = quality.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(template) = &self.template {
            config.output_template.clone_from(template);
        }
        if let Some(ytdlp) = &self.ytdlp {
            config.ytdlp_path.clone_from(ytdlp);
        }
        if self.tag {
            config.inference.enabled = true;
        }
        if self.cancel_first {
            config.abort_precedence = AbortPrecedence::CancelFirst;
        }
        config.validate();
    }

    /// Whether any selection option was given.
    pub fn narrows_selection(&self) -> bool {
        !self.select.is_empty() || !self.skip.is_empty() || self.filter.is_some()
    }

    /// Whether the item at `ordinal` stays selected.
    pub fn wants(&self, ordinal: usize, matches_filter: bool) -> bool {
        (self.select.is_empty() || self.select.contains(&ordinal))
            && !self.skip.contains(&ordinal)
            && matches_filter
    }

    /// Apply `--select`, `--skip` and `--filter` to the fetched items.
    /// Returns the number of selected items.
    pub async fn apply_selection(&self, coordinator: &Coordinator) -> playfetch_core::Result<usize> {
        let items = coordinator.items().await;
        if !self.narrows_selection() {
            return Ok(items.len());
        }

        let matched: Option<HashSet<String>> = match &self.filter {
            Some(text) => Some(
                coordinator
                    .filter(text)
                    .await
                    .into_iter()
                    .map(|item| item.key)
                    .collect(),
            ),
            None => None,
        };

        let mut selected = 0;
        for ItemState { key, ordinal, .. } in items {
            let matches_filter = matched.as_ref().is_none_or(|keys| keys.contains(&key));
            let keep = self.wants(ordinal, matches_filter);
            coordinator.set_selected(&key, keep).await?;
            if keep {
                selected += 1;
            }
        }
        Ok(selected)
    }
}

fn parse_quality(label: &str) -> Result<Quality, String> {
    label.parse().map_err(|e: playfetch_core::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("playfetch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_minimal_arguments() {
        let cli = parse(&["https://example.com/playlist"]);
        assert_eq!(cli.url, "https://example.com/playlist");
        assert!(cli.quality.is_none());
        assert!(!cli.narrows_selection());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_quality_labels() {
        let cli = parse(&["u", "-q", "only_mp3"]);
        assert_eq!(cli.quality, Some(Quality::AudioOnly));
        assert!(Cli::try_parse_from(["playfetch", "u", "-q", "4k"]).is_err());
    }

    #[test]
    fn test_selection_lists() {
        let cli = parse(&["u", "--select", "1,3,5", "--skip", "3"]);
        assert_eq!(cli.select, vec![1, 3, 5]);
        assert!(cli.wants(1, true));
        assert!(!cli.wants(2, true));
        assert!(!cli.wants(3, true));
        assert!(!cli.wants(5, false));
    }

    #[test]
    fn test_overrides_are_applied_and_clamped() {
        let cli = parse(&[
            "u",
            "-f",
            "/music",
            "-j",
            "20",
            "--tag",
            "--cancel-first",
            "-vv",
        ]);
        let mut config = AppConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config.download_folder, PathBuf::from("/music"));
        assert_eq!(config.concurrency, 8);
        assert!(config.inference.enabled);
        assert_eq!(config.abort_precedence, AbortPrecedence::CancelFirst);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_unset_options_keep_file_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let saved = AppConfig {
            download_folder: PathBuf::from("/srv/media"),
            concurrency: 3,
            ..AppConfig::default()
        };
        saved.save_to(&path).unwrap();

        let cli = parse(&["u", "--config", path.to_str().unwrap(), "-q", "720p"]);
        let mut config = AppConfig::load_from(cli.config.as_deref().unwrap()).unwrap();
        cli.apply_to(&mut config);

        assert_eq!(config.download_folder, PathBuf::from("/srv/media"));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.quality, Quality::P720);
    }
}
