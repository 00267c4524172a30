//! Environment readiness checks for `udl doctor`
//!
//! Everything the checker touches goes through [`Probe`], so the rules can be
//! tested without real binaries on PATH.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::{expand_path, resolve_state_file, Config, RuntimeOptions, SourceType};

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid version pattern"));

const VERSION_TIMEOUT: Duration = Duration::from_secs(15);

/// Client id/secret pairs spotDL ships as defaults; heavily rate limited
const SHARED_SPOTDL_CREDENTIALS: &[(&str, &str)] = &[
    ("5f573c9620494bae87890c0f08a60293", "212476d9b0f3472eaa762d90b19b0ba8"),
    ("f8a606e5583643beaa27ce62c48e3fc1", "f6f4c8f73f0649939286cf417c811607"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub severity: Severity,
    pub name: &'static str,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub checks: Vec<Check>,
}

impl Report {
    fn push(&mut self, severity: Severity, name: &'static str, message: impl Into<String>) {
        self.checks.push(Check {
            severity,
            name,
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.checks.iter().filter(|c| c.severity == Severity::Error).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Side effects the checker needs
#[async_trait]
pub trait Probe: Send + Sync {
    /// Resolved location of an executable
    fn look_path(&self, binary: &str) -> Option<PathBuf>;

    /// Combined output of `<binary> --version`
    async fn read_version(&self, binary: &str) -> Result<String>;

    fn env(&self, key: &str) -> Option<String>;

    fn check_writable(&self, dir: &Path) -> Result<()>;

    /// spotDL's own config file and its contents, when present
    fn spotdl_config(&self) -> Option<(PathBuf, String)>;
}

/// The real machine
pub struct SystemProbe;

#[async_trait]
impl Probe for SystemProbe {
    fn look_path(&self, binary: &str) -> Option<PathBuf> {
        look_path(binary)
    }

    async fn read_version(&self, binary: &str) -> Result<String> {
        let output = tokio::time::timeout(VERSION_TIMEOUT, Command::new(binary).arg("--version").output())
            .await
            .with_context(|| format!("{} --version timed out", binary))?
            .with_context(|| format!("Failed to run {} --version", binary))?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", binary, output.status);
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn check_writable(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            anyhow::bail!("{} is not a directory", dir.display());
        }
        tempfile::Builder::new()
            .prefix(".udl-write-check-")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create a file in {:?}", dir))?;
        Ok(())
    }

    fn spotdl_config(&self) -> Option<(PathBuf, String)> {
        let path = dirs::home_dir()?.join(".spotdl").join("config.json");
        let contents = std::fs::read_to_string(&path).ok()?;
        Some((path, contents))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Dependency {
    binary: String,
    min_version: Option<&'static str>,
    /// Versions at or above this are untested
    max_exclusive: Option<&'static str>,
}

/// Binaries the enabled sources need, or every known one for an empty config
fn required_dependencies(config: &Config, runtime: &RuntimeOptions) -> Vec<Dependency> {
    let scdl = Dependency {
        binary: runtime.scdl_bin.clone(),
        min_version: Some("3.0.0"),
        max_exclusive: Some("4.0.0"),
    };
    let ytdlp = Dependency {
        binary: runtime.ytdlp_bin.clone(),
        min_version: Some("2024.1.0"),
        max_exclusive: Some("2027.0.0"),
    };
    let spotdl = Dependency {
        binary: runtime.spotdl_bin.clone(),
        min_version: Some("4.0.0"),
        max_exclusive: None,
    };
    let deemix = Dependency {
        binary: runtime.deemix_bin.clone(),
        min_version: None,
        max_exclusive: None,
    };

    let mut required: BTreeMap<&'static str, Dependency> = BTreeMap::new();
    for source in config.sources.iter().filter(|s| s.enabled) {
        match source.adapter.kind.trim() {
            "scdl" => {
                required.insert("scdl", scdl.clone());
                required.insert("yt-dlp", ytdlp.clone());
            }
            "spotdl" => {
                required.insert("spotdl", spotdl.clone());
            }
            "deemix" => {
                required.insert("deemix", deemix.clone());
            }
            _ => {}
        }
    }
    if config.sources.is_empty() {
        required.insert("scdl", scdl);
        required.insert("yt-dlp", ytdlp);
        required.insert("spotdl", spotdl);
    }
    required.into_values().collect()
}

pub struct Checker<P: Probe> {
    probe: P,
}

impl<P: Probe> Checker<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    pub async fn check(&self, config: &Config, runtime: &RuntimeOptions) -> Report {
        let mut report = Report::default();

        for dep in required_dependencies(config, runtime) {
            self.check_dependency(&dep, &mut report).await;
        }

        let enabled: Vec<_> = config.sources.iter().filter(|s| s.enabled).collect();
        if enabled.iter().any(|s| s.source_type == SourceType::Spotify) {
            self.check_spotify_auth(&mut report);
        }
        if enabled.iter().any(|s| s.source_type == SourceType::Soundcloud) {
            match self.probe.env("SCDL_CLIENT_ID").filter(|v| !v.trim().is_empty()) {
                Some(_) => report.push(Severity::Info, "auth", "SCDL_CLIENT_ID is present"),
                None => report.push(
                    Severity::Error,
                    "auth",
                    "SCDL_CLIENT_ID is required for soundcloud sources",
                ),
            }
        }

        for source in &enabled {
            match expand_path(&source.target_dir) {
                Ok(dir) => self.check_dir(&mut report, &dir, &format!("source {} target_dir", source.id)),
                Err(e) => report.push(
                    Severity::Error,
                    "filesystem",
                    format!("source {} target_dir is invalid: {}", source.id, e),
                ),
            }

            let Some(state_file) = source.state_file.as_deref() else {
                continue;
            };
            match resolve_state_file(&config.defaults.state_dir, state_file) {
                Ok(path) => {
                    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                    self.check_dir(&mut report, &dir, &format!("source {} state directory", source.id));
                }
                Err(e) => report.push(
                    Severity::Error,
                    "filesystem",
                    format!("source {} state_file is invalid: {}", source.id, e),
                ),
            }
        }

        if config.sources.is_empty() {
            report.push(Severity::Warn, "config", "no sources configured");
        }
        report
    }

    async fn check_dependency(&self, dep: &Dependency, report: &mut Report) {
        let Some(location) = self.probe.look_path(&dep.binary) else {
            report.push(Severity::Error, "dependency", format!("{} not found in PATH", dep.binary));
            return;
        };
        report.push(
            Severity::Info,
            "dependency",
            format!("{} found at {}", dep.binary, location.display()),
        );

        let Some(min) = dep.min_version else {
            return;
        };
        let output = match self.probe.read_version(&dep.binary).await {
            Ok(output) => output,
            Err(e) => {
                report.push(
                    Severity::Warn,
                    "dependency",
                    format!("{} version could not be read: {:#}", dep.binary, e),
                );
                return;
            }
        };
        let Some(version) = extract_version(&output) else {
            report.push(
                Severity::Warn,
                "dependency",
                format!("{} version output is unrecognized: {:?}", dep.binary, output.trim()),
            );
            return;
        };

        if compare_versions(&version, min) == Ordering::Less {
            report.push(
                Severity::Error,
                "dependency",
                format!("{} version {} is below minimum {}", dep.binary, version, min),
            );
            return;
        }
        match dep.max_exclusive {
            Some(max) if compare_versions(&version, max) != Ordering::Less => report.push(
                Severity::Error,
                "dependency",
                format!(
                    "{} version {} is outside supported range >={} and <{}",
                    dep.binary, version, min, max
                ),
            ),
            _ => report.push(
                Severity::Info,
                "dependency",
                format!("{} version {} is compatible", dep.binary, version),
            ),
        }
    }

    fn check_spotify_auth(&self, report: &mut Report) {
        let has_own = ["UDL_SPOTIFY_CLIENT_ID", "UDL_SPOTIFY_CLIENT_SECRET"]
            .iter()
            .all(|key| self.probe.env(key).is_some_and(|v| !v.trim().is_empty()));
        if has_own {
            report.push(Severity::Info, "auth", "Spotify API credentials are present");
        } else {
            report.push(
                Severity::Warn,
                "auth",
                "UDL_SPOTIFY_CLIENT_ID/UDL_SPOTIFY_CLIENT_SECRET not set; playlist listing falls back to the public page",
            );
        }

        if let Some((path, contents)) = self.probe.spotdl_config() {
            if uses_shared_spotdl_credentials(&contents) {
                report.push(
                    Severity::Warn,
                    "auth",
                    format!(
                        "spotdl config at {} is using shared default Spotify credentials; set your own app client_id/client_secret to avoid API throttling",
                        path.display()
                    ),
                );
            }
        }
    }

    fn check_dir(&self, report: &mut Report, dir: &Path, label: &str) {
        match self.probe.check_writable(dir) {
            Ok(()) => report.push(Severity::Info, "filesystem", format!("{} is writable", label)),
            Err(e) => report.push(
                Severity::Error,
                "filesystem",
                format!("{} is not writable: {:#}", label, e),
            ),
        }
    }
}

#[derive(Deserialize)]
struct SpotdlConfig {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

fn uses_shared_spotdl_credentials(contents: &str) -> bool {
    let Ok(config) = serde_json::from_str::<SpotdlConfig>(contents) else {
        return false;
    };
    let (id, secret) = (config.client_id.trim(), config.client_secret.trim());
    SHARED_SPOTDL_CREDENTIALS
        .iter()
        .any(|(shared_id, shared_secret)| id == *shared_id && secret == *shared_secret)
}

/// First `major.minor.patch` in a version banner
pub fn extract_version(raw: &str) -> Option<String> {
    let caps = VERSION.captures(raw)?;
    Some(format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

/// Numeric comparison of dotted versions; missing parts count as zero
pub fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let parts = |v: &str| -> [u64; 3] {
        let mut out = [0; 3];
        for (slot, part) in out.iter_mut().zip(v.split('.')) {
            *slot = part.trim().parse().unwrap_or(0);
        }
        out
    };
    parts(lhs).cmp(&parts(rhs))
}

/// Search PATH the way a shell would
pub fn look_path(binary: &str) -> Option<PathBuf> {
    let binary = binary.trim();
    if binary.is_empty() {
        return None;
    }
    if binary.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(binary);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProbe {
        binaries: HashMap<String, String>,
        env: HashMap<String, String>,
        unwritable: Vec<PathBuf>,
        spotdl_config: Option<String>,
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn look_path(&self, binary: &str) -> Option<PathBuf> {
            self.binaries
                .contains_key(binary)
                .then(|| PathBuf::from("/usr/bin").join(binary))
        }

        async fn read_version(&self, binary: &str) -> Result<String> {
            self.binaries
                .get(binary)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("not installed"))
        }

        fn env(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }

        fn check_writable(&self, dir: &Path) -> Result<()> {
            if self.unwritable.iter().any(|p| p == dir) {
                anyhow::bail!("permission denied");
            }
            Ok(())
        }

        fn spotdl_config(&self) -> Option<(PathBuf, String)> {
            self.spotdl_config
                .clone()
                .map(|c| (PathBuf::from("/home/u/.spotdl/config.json"), c))
        }
    }

    fn config(sources: serde_json::Value) -> Config {
        serde_json::from_value(serde_json::json!({
            "defaults": { "state_dir": "/state" },
            "sources": sources,
        }))
        .unwrap()
    }

    fn messages(report: &Report, severity: Severity) -> Vec<String> {
        report
            .checks
            .iter()
            .filter(|c| c.severity == severity)
            .map(|c| c.message.clone())
            .collect()
    }

    #[test]
    fn test_version_helpers() {
        assert_eq!(extract_version("scdl 3.1.4\n").as_deref(), Some("3.1.4"));
        assert_eq!(extract_version("2024.08.06").as_deref(), Some("2024.08.06"));
        assert_eq!(extract_version("unknown"), None);
        assert_eq!(compare_versions("2024.08.06", "2024.1.0"), Ordering::Greater);
        assert_eq!(compare_versions("3.0", "3.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.9.9", "3.0.0"), Ordering::Less);
    }

    #[tokio::test]
    async fn test_soundcloud_source_checks() {
        let probe = FakeProbe {
            binaries: HashMap::from([
                ("scdl".to_string(), "2.12.0".to_string()),
                ("yt-dlp".to_string(), "2025.01.15".to_string()),
            ]),
            unwritable: vec![PathBuf::from("/music/sc")],
            ..FakeProbe::default()
        };
        let config = config(serde_json::json!([{
            "id": "sc", "type": "soundcloud", "target_dir": "/music/sc",
            "url": "https://soundcloud.com/u", "state_file": "sc.sync.txt",
            "adapter": { "kind": "scdl" }
        }]));

        let report = Checker::new(probe).check(&config, &RuntimeOptions::default()).await;
        let errors = messages(&report, Severity::Error);
        assert_eq!(report.error_count(), 3);
        assert!(errors.contains(&"scdl version 2.12.0 is below minimum 3.0.0".to_string()));
        assert!(errors.contains(&"SCDL_CLIENT_ID is required for soundcloud sources".to_string()));
        assert!(errors.iter().any(|m| m.starts_with("source sc target_dir is not writable")));
        assert!(messages(&report, Severity::Info).contains(&"yt-dlp version 2025.01.15 is compatible".to_string()));
        assert!(messages(&report, Severity::Info).contains(&"source sc state directory is writable".to_string()));
    }

    #[tokio::test]
    async fn test_spotify_source_checks() {
        let probe = FakeProbe {
            env: HashMap::from([("UDL_SPOTIFY_CLIENT_ID".to_string(), "id".to_string())]),
            spotdl_config: Some(
                r#"{"client_id": "5f573c9620494bae87890c0f08a60293", "client_secret": "212476d9b0f3472eaa762d90b19b0ba8"}"#
                    .to_string(),
            ),
            ..FakeProbe::default()
        };
        let config = config(serde_json::json!([{
            "id": "sp", "type": "spotify", "target_dir": "/music/sp",
            "url": "https://open.spotify.com/playlist/x", "state_file": "sp.spotdl",
            "adapter": { "kind": "spotdl" }
        }]));

        let report = Checker::new(probe).check(&config, &RuntimeOptions::default()).await;
        assert_eq!(messages(&report, Severity::Error), vec!["spotdl not found in PATH"]);
        let warnings = messages(&report, Severity::Warn);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("shared default Spotify credentials"));
    }

    #[tokio::test]
    async fn test_empty_config_checks_every_binary() {
        let probe = FakeProbe::default();
        let report = Checker::new(probe).check(&Config::default(), &RuntimeOptions::default()).await;
        assert_eq!(report.error_count(), 3);
        assert_eq!(messages(&report, Severity::Warn), vec!["no sources configured"]);
    }

    #[test]
    fn test_look_path_rejects_missing() {
        assert_eq!(look_path(""), None);
        assert_eq!(look_path("/definitely/not/here/udl-bin"), None);
    }
}
