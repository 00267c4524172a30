//! Configuration model and persistence
//!
//! Stored as JSON in ~/.config/udl/config.json unless `--config` points elsewhere.
//! Sources are processed in the order they appear in the file.

pub mod paths;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use paths::{expand_path, resolve_archive_file, resolve_state_file};

const CONFIG_VERSION: u32 = 1;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Settings shared by every source
    #[serde(default)]
    pub defaults: Defaults,
    /// Sources in processing order
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Settings shared by every source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Directory holding sync-state, archive and cache files
    pub state_dir: PathBuf,
    /// Archive file name (bare names become per-source files)
    pub archive_file: String,
    /// Download threads handed to downloaders that support it
    pub threads: u32,
    /// Keep going with the next source after a failure
    pub continue_on_error: bool,
    /// Per-source command timeout (0 disables)
    pub command_timeout_seconds: u64,
    /// Persist the local media index between runs
    pub local_index_cache: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            archive_file: "archive.txt".to_string(),
            threads: 1,
            continue_on_error: true,
            command_timeout_seconds: 900,
            local_index_cache: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Soundcloud,
    Spotify,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Soundcloud => write!(f, "soundcloud"),
            SourceType::Spotify => write!(f, "spotify"),
        }
    }
}

/// A single remote listing mirrored into a local directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub target_dir: PathBuf,
    pub url: String,
    /// Sync-state file (relative paths live under the state dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncPolicy,
    pub adapter: AdapterSpec,
    /// Archive path override set for a single run (temporary state swap)
    #[serde(skip)]
    pub download_archive_path: Option<PathBuf>,
}

impl Source {
    /// Break-on-existing defaults to on
    pub fn break_on_existing(&self) -> bool {
        self.sync.break_on_existing.unwrap_or(true)
    }

    pub fn ask_on_existing(&self) -> bool {
        self.sync.ask_on_existing.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_on_existing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_on_existing: Option<bool>,
}

/// Which downloader handles the source, plus its passthrough arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

/// Downloader binaries and capabilities, resolved once per process
///
/// Passed explicitly into adapters and listing readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub scdl_bin: String,
    /// scdl >= 3 accepts `--yt-dlp-args`; older builds cannot be driven
    pub scdl_supports_ytdlp_args: bool,
    pub spotdl_bin: String,
    pub deemix_bin: String,
    pub ytdlp_bin: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            scdl_bin: "scdl".to_string(),
            scdl_supports_ytdlp_args: true,
            spotdl_bin: "spotdl".to_string(),
            deemix_bin: "deemix".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            defaults: Defaults::default(),
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;

        debug!("Loaded {} sources from {}", config.sources.len(), path.display());
        Ok(config)
    }

    /// Save configuration, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Starter config written by `udl init`: one SoundCloud and one Spotify source
    pub fn starter() -> Self {
        let source = |id: &str, source_type, target: &str, url: &str, state: &str, kind: &str, extra: &[&str]| Source {
            id: id.to_string(),
            source_type,
            enabled: true,
            target_dir: PathBuf::from(target),
            url: url.to_string(),
            state_file: Some(PathBuf::from(state)),
            sync: SyncPolicy::default(),
            adapter: AdapterSpec {
                kind: kind.to_string(),
                extra_args: extra.iter().map(|a| a.to_string()).collect(),
            },
            download_archive_path: None,
        };
        Self {
            version: CONFIG_VERSION,
            defaults: Defaults::default(),
            sources: vec![
                source(
                    "soundcloud-likes",
                    SourceType::Soundcloud,
                    "~/Music/downloaded/sc-likes",
                    "https://soundcloud.com/your-user",
                    "soundcloud-likes.sync.scdl",
                    "scdl",
                    &["-f"],
                ),
                source(
                    "spotify-groove",
                    SourceType::Spotify,
                    "~/Music/downloaded/spotify-groove",
                    "https://open.spotify.com/playlist/replace-me",
                    "spotify-groove.sync.spotdl",
                    "spotdl",
                    &["--headless", "--print-errors"],
                ),
            ],
        }
    }

    /// Default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("udl").join("config.json"))
    }

    /// Structural checks that do not touch the filesystem
    ///
    /// Every problem is collected so one run of `udl validate` reports them all.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.version != CONFIG_VERSION {
            problems.push(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            ));
        }
        if self.defaults.state_dir.as_os_str().is_empty() {
            problems.push("defaults.state_dir must be set".to_string());
        }
        if self.defaults.threads == 0 {
            problems.push("defaults.threads must be at least 1".to_string());
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            let id = source.id.trim();
            if id.is_empty() {
                problems.push("source id must not be empty".to_string());
                continue;
            }
            if !seen.insert(id.to_string()) {
                problems.push(format!("duplicate source id {:?}", id));
            }
            problems.extend(source.problems().into_iter().map(|p| format!("source {:?} {}", id, p)));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid config:\n  - {}", problems.join("\n  - "))
        }
    }
}

impl Source {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.target_dir.as_os_str().is_empty() {
            problems.push("target_dir must be set".to_string());
        }
        match url::Url::parse(self.url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => problems.push(format!("url scheme {:?} is not http(s)", parsed.scheme())),
            Err(e) => problems.push(format!("has invalid url: {}", e)),
        }
        if self.state_file.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
            problems.push(format!("state_file is required for {}", self.source_type));
        }

        let kind = self.adapter.kind.trim();
        match (self.source_type, kind) {
            (_, "") => problems.push("adapter.kind must be set".to_string()),
            (SourceType::Soundcloud, "scdl") | (SourceType::Spotify, "spotdl" | "deemix") => {}
            (SourceType::Soundcloud, _) => problems.push("soundcloud type requires scdl adapter".to_string()),
            (SourceType::Spotify, _) => problems.push("spotify type requires spotdl or deemix adapter".to_string()),
        }

        let supports_policy = self.source_type == SourceType::Soundcloud || kind == "deemix";
        if !supports_policy && self.sync.break_on_existing.is_some() {
            problems.push("sync.break_on_existing is only supported for soundcloud or spotify+deemix".to_string());
        }
        if !supports_policy && self.sync.ask_on_existing.is_some() {
            problems.push("sync.ask_on_existing is only supported for soundcloud or spotify+deemix".to_string());
        }
        problems
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_enabled() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    if let Some(state) = dirs::state_dir() {
        return state.join("udl");
    }
    match dirs::home_dir() {
        Some(home) => home.join(".local").join("state").join("udl"),
        None => PathBuf::from("./.udl-state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "version": 1,
            "defaults": { "state_dir": "/tmp/udl-state", "continue_on_error": false },
            "sources": [
                {
                    "id": "sc-likes",
                    "type": "soundcloud",
                    "target_dir": "~/Music/sc",
                    "url": "https://soundcloud.com/someone",
                    "state_file": "sc-likes.sync.scdl",
                    "adapter": { "kind": "scdl", "extra_args": ["-f"] }
                }
            ]
        }"#
    }

    #[test]
    fn test_parse_config_applies_defaults() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(config.defaults.archive_file, "archive.txt");
        assert_eq!(config.defaults.command_timeout_seconds, 900);
        assert!(!config.defaults.continue_on_error);

        let source = &config.sources[0];
        assert!(source.enabled);
        assert_eq!(source.source_type, SourceType::Soundcloud);
        assert!(source.break_on_existing());
        assert!(!source.ask_on_existing());
        assert!(source.download_archive_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        let duplicate = config.sources[0].clone();
        config.sources.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        let mut spotify = config.sources[0].clone();
        spotify.id = "sp".to_string();
        spotify.source_type = SourceType::Spotify;
        spotify.url = "ftp://example.com/list".to_string();
        spotify.sync.ask_on_existing = Some(true);
        config.sources.push(spotify);

        let message = format!("{:#}", config.validate().unwrap_err());
        assert!(message.contains("spotify type requires spotdl or deemix adapter"));
        assert!(message.contains("not http(s)"));
        assert!(message.contains("sync.ask_on_existing"));
        assert!(!message.contains("sc-likes"));
    }

    #[test]
    fn test_starter_config_is_valid() {
        let config = Config::starter();
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].adapter.kind, "spotdl");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].id, "sc-likes");
        assert_eq!(loaded.defaults.state_dir, PathBuf::from("/tmp/udl-state"));
    }
}
