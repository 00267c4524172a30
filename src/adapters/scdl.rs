//! scdl (SoundCloud) adapter
//!
//! scdl keeps two records: its own `--sync` file and the yt-dlp archive
//! passed through `--yt-dlp-args`. Both are managed here, so user-supplied
//! `--sync` and `--yt-dlp-args` in `extra_args` are folded into ours rather
//! than passed twice.

use std::path::PathBuf;
use std::time::Duration;

use super::{contains_arg, sanitize_url, state_file, target_dir, Adapter, AdapterError};
use crate::config::{resolve_archive_file, Defaults, RuntimeOptions, Source, SourceType};
use crate::engine::runner::ExecSpec;

const DEFAULT_YTDLP_ARGS: &[&str] = &["--embed-thumbnail", "--embed-metadata"];
const MODE_FLAGS: &[&str] = &["-a", "-t", "-f", "-C", "-p", "-r"];

pub struct ScdlAdapter {
    bin: String,
    supports_ytdlp_args: bool,
}

impl ScdlAdapter {
    pub fn new(runtime: &RuntimeOptions) -> Self {
        Self {
            bin: runtime.scdl_bin.clone(),
            supports_ytdlp_args: runtime.scdl_supports_ytdlp_args,
        }
    }
}

impl Adapter for ScdlAdapter {
    fn kind(&self) -> &'static str {
        "scdl"
    }

    fn binary(&self) -> &str {
        &self.bin
    }

    fn required_env(&self, _source: &Source) -> Vec<&'static str> {
        vec!["SCDL_CLIENT_ID"]
    }

    fn validate(&self, source: &Source) -> Result<(), AdapterError> {
        if source.source_type != SourceType::Soundcloud {
            return Err(AdapterError::Validation(
                "scdl adapter only supports soundcloud sources".to_string(),
            ));
        }
        Ok(())
    }

    fn build_command(
        &self,
        source: &Source,
        defaults: &Defaults,
        timeout: Option<Duration>,
    ) -> Result<ExecSpec, AdapterError> {
        if !self.supports_ytdlp_args {
            return Err(AdapterError::Build(format!(
                "scdl binary {:?} does not support --yt-dlp-args (requires scdl >= 3.0.0); set UDL_SCDL_BIN to a compatible binary",
                self.bin
            )));
        }

        let dir = target_dir(source)?;
        let sync_path = state_file(source, defaults)?;
        let archive_path = match &source.download_archive_path {
            Some(path) => path.clone(),
            None => resolve_archive_path(source, defaults)?,
        };

        let mut args = vec!["-l".to_string(), source.url.clone()];
        let mut display = vec!["-l".to_string(), sanitize_url(&source.url)];
        let mut push = |value: String, shown: String| {
            args.push(value);
            display.push(shown);
        };

        if !MODE_FLAGS.iter().any(|flag| contains_arg(&source.adapter.extra_args, flag)) {
            push("-f".to_string(), "-f".to_string());
        }
        let sync_text = sync_path.to_string_lossy().into_owned();
        push("--sync".to_string(), "--sync".to_string());
        push(sync_text.clone(), sync_text);

        if let Ok(client_id) = std::env::var("SCDL_CLIENT_ID") {
            if !client_id.trim().is_empty() {
                push("--client-id".to_string(), "--client-id".to_string());
                push(client_id.trim().to_string(), "***".to_string());
            }
        }

        for arg in strip_managed_args(&source.adapter.extra_args) {
            push(arg.clone(), arg);
        }

        let archive_text = archive_path.to_string_lossy();
        let ytdlp_args = match extract_ytdlp_args(&source.adapter.extra_args) {
            Some(custom) => set_download_archive(&custom, &archive_text),
            None => {
                let mut tokens: Vec<String> = DEFAULT_YTDLP_ARGS.iter().map(|t| t.to_string()).collect();
                tokens.push("--download-archive".to_string());
                tokens.push(archive_text.into_owned());
                tokens.join(" ")
            }
        };
        let ytdlp_args = normalize_break_args(&ytdlp_args, source.break_on_existing());
        push("--yt-dlp-args".to_string(), "--yt-dlp-args".to_string());
        push(ytdlp_args.clone(), ytdlp_args);

        Ok(ExecSpec {
            bin: self.bin.clone(),
            args,
            dir: Some(dir),
            timeout,
            display_args: Some(display),
        })
    }
}

/// Archive file scdl's yt-dlp writes to for this source
///
/// A `--download-archive` inside the source's own `--yt-dlp-args` wins over
/// the configured default. Relative names resolve under the state dir, and
/// the built command always carries the resolved path.
pub fn resolve_archive_path(source: &Source, defaults: &Defaults) -> Result<PathBuf, AdapterError> {
    let configured = extract_ytdlp_args(&source.adapter.extra_args)
        .and_then(|raw| extract_download_archive_arg(&raw));
    let name = configured.as_deref().unwrap_or(&defaults.archive_file);
    resolve_archive_file(&defaults.state_dir, name, &source.id)
        .map_err(|e| AdapterError::Build(format!("invalid archive file: {}", e)))
}

/// Value of `--yt-dlp-args` in either `--flag value` or `--flag=value` form
pub fn extract_ytdlp_args(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let arg = arg.trim();
        if arg == "--yt-dlp-args" {
            return iter.next().map(|v| v.trim().to_string());
        }
        if let Some(value) = arg.strip_prefix("--yt-dlp-args=") {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// `--download-archive` path inside a yt-dlp argument string
pub fn extract_download_archive_arg(raw: &str) -> Option<String> {
    let mut tokens = raw.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "--download-archive" {
            return tokens.next().map(str::to_string);
        }
        if let Some(value) = token.strip_prefix("--download-archive=") {
            return (!value.trim().is_empty()).then(|| value.trim().to_string());
        }
    }
    None
}

/// Point `--download-archive` at `path`, replacing any existing value
fn set_download_archive(raw: &str, path: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut tokens = raw.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "--download-archive" {
            tokens.next();
            continue;
        }
        if token.starts_with("--download-archive=") {
            continue;
        }
        out.push(token.to_string());
    }
    out.push("--download-archive".to_string());
    out.push(path.to_string());
    out.join(" ")
}

fn strip_managed_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let trimmed = arg.trim();
        if trimmed == "--yt-dlp-args" || trimmed == "--sync" {
            iter.next();
            continue;
        }
        if trimmed.starts_with("--yt-dlp-args=") || trimmed.starts_with("--sync=") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

fn normalize_break_args(raw: &str, break_on_existing: bool) -> String {
    let mut tokens: Vec<&str> = raw
        .split_whitespace()
        .filter(|t| *t != "--break-on-existing" && *t != "--no-break-on-existing")
        .collect();
    tokens.push(if break_on_existing {
        "--break-on-existing"
    } else {
        "--no-break-on-existing"
    });
    tokens.join(" ")
}
