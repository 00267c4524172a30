//! Remote listing readers
//!
//! Each reader turns a source URL into the ordered track list the reconciler
//! works from. Order is whatever the remote service reports, newest first for
//! SoundCloud likes and playlist order for Spotify.

pub mod soundcloud;
pub mod spotify;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Source;

pub use soundcloud::YtDlpListing;
pub use spotify::SpotifyListing;

/// One item of a remote listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub url: String,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Name a downloader would most likely give the file
    pub fn local_title(&self) -> String {
        let title = self.title.trim();
        let artist = self.artist.trim();
        match (artist.is_empty(), title.is_empty()) {
            (false, false) => format!("{} - {}", artist, title),
            (_, false) => title.to_string(),
            _ => self.id.clone(),
        }
    }

    /// Titles to try against the local index, most specific first
    pub fn title_candidates(&self, display_name: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let local = self.local_title();
        for value in [
            Some(local.as_str()),
            display_name,
            Some(self.title.as_str()),
            Some(self.id.as_str()),
        ]
        .into_iter()
        .flatten()
        {
            let trimmed = value.trim();
            if !trimmed.is_empty() && !candidates.iter().any(|c| c == trimmed) {
                candidates.push(trimmed.to_string());
            }
        }
        candidates
    }
}

/// Source of an ordered remote track list
#[async_trait]
pub trait RemoteListing: Send + Sync {
    async fn list(&self, source: &Source, cancel: &CancellationToken) -> Result<Vec<RemoteTrack>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_candidates_order_and_dedup() {
        let track = RemoteTrack {
            id: "abc".into(),
            title: "Song".into(),
            artist: "Artist".into(),
            url: String::new(),
        };
        assert_eq!(
            track.title_candidates(Some("Song")),
            vec!["Artist - Song", "Song", "abc"]
        );
        assert_eq!(RemoteTrack::new("abc", "").title_candidates(None), vec!["abc"]);
    }
}
