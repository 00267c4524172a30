//! SoundCloud listing via `yt-dlp --flat-playlist`

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RemoteListing, RemoteTrack};
use crate::config::Source;

const PRINT_FORMAT: &str = "%(id)s\t%(title)s\t%(webpage_url)s";

/// scdl mode flags, in the precedence scdl itself applies
const MODES: &[(&str, Option<&str>)] = &[
    ("-a", None),
    ("-t", Some("tracks")),
    ("-f", Some("likes")),
    ("-C", Some("comments")),
    ("-p", Some("sets")),
    ("-r", Some("reposts")),
];

pub struct YtDlpListing {
    bin: String,
}

impl YtDlpListing {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl RemoteListing for YtDlpListing {
    async fn list(&self, source: &Source, cancel: &CancellationToken) -> Result<Vec<RemoteTrack>> {
        let list_url = effective_list_url(&source.url, &source.adapter.extra_args);
        debug!("[{}] Listing {} via {}", source.id, list_url, self.bin);

        let child = Command::new(&self.bin)
            .args(["--flat-playlist", "--print", PRINT_FORMAT, &list_url])
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = child => output
                .with_context(|| format!("Failed to run {} for {}", self.bin, list_url))?,
            _ = cancel.cancelled() => anyhow::bail!("listing {} cancelled", list_url),
        };

        if !output.status.success() {
            anyhow::bail!(
                "yt-dlp listing failed for {}: {}",
                list_url,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let tracks = parse_track_list(&String::from_utf8_lossy(&output.stdout));
        debug!("[{}] Remote listing has {} tracks", source.id, tracks.len());
        Ok(tracks)
    }
}

/// Listing URL matching the scdl mode in `extra_args` (likes by default)
pub fn effective_list_url(base: &str, extra_args: &[String]) -> String {
    let mode = MODES
        .iter()
        .find(|(flag, _)| extra_args.iter().any(|a| a.trim() == *flag))
        .map(|(_, segment)| *segment)
        .unwrap_or(Some("likes"));

    match mode {
        Some(segment) => append_segment(base, segment),
        None => base.to_string(),
    }
}

fn append_segment(base: &str, segment: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return base.to_string();
    }
    if trimmed.ends_with(&format!("/{}", segment)) {
        return trimmed.to_string();
    }
    format!("{}/{}", trimmed, segment)
}

/// Parse `id<TAB>title<TAB>url` lines, skipping placeholder IDs
pub fn parse_track_list(payload: &str) -> Vec<RemoteTrack> {
    payload
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.splitn(3, '\t');
            let id = parts.next()?.trim();
            if id.is_empty() || id == "NA" {
                return None;
            }
            Some(RemoteTrack {
                id: id.to_string(),
                title: parts.next().unwrap_or_default().trim().to_string(),
                artist: String::new(),
                url: parts.next().unwrap_or_default().trim().to_string(),
            })
        })
        .collect()
}
