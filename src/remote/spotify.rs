//! Spotify playlist listing
//!
//! Uses the Web API with client credentials when they are available, and
//! falls back to scraping track references out of the public playlist page.
//! The fallback only yields IDs, so titles are the IDs themselves.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RemoteListing, RemoteTrack};
use crate::config::Source;
use crate::state::spotify::extract_track_id;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const PAGE_BASE: &str = "https://open.spotify.com";

static TRACK_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify:track:([A-Za-z0-9]{22})").expect("valid track ref pattern"));

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifyCredentials {
    /// Read `UDL_SPOTIFY_CLIENT_ID` / `UDL_SPOTIFY_CLIENT_SECRET`
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("UDL_SPOTIFY_CLIENT_ID").ok()?;
        let client_secret = std::env::var("UDL_SPOTIFY_CLIENT_SECRET").ok()?;
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<PageItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    #[serde(default)]
    name: String,
}

pub struct SpotifyListing {
    http_client: Client,
    credentials: Option<SpotifyCredentials>,
}

impl SpotifyListing {
    pub fn new(credentials: Option<SpotifyCredentials>) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("udl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http_client,
            credentials,
        })
    }

    async fn list_playlist(&self, playlist_id: &str) -> Result<Vec<RemoteTrack>> {
        let api_result = match &self.credentials {
            Some(creds) => match self.fetch_token(creds).await {
                Ok(token) => self.list_via_api(playlist_id, &token).await,
                Err(e) => Err(e),
            },
            None => Err(anyhow::anyhow!("Spotify client credentials are not set")),
        };

        match api_result {
            Ok(tracks) => Ok(tracks),
            Err(api_err) => {
                debug!("Spotify API listing unavailable: {:#}", api_err);
                self.list_via_page(playlist_id).await.map_err(|page_err| {
                    anyhow::anyhow!("{:#} (playlist page fallback failed: {:#})", api_err, page_err)
                })
            }
        }
    }

    async fn fetch_token(&self, creds: &SpotifyCredentials) -> Result<String> {
        let response = self
            .http_client
            .post(TOKEN_URL)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .context("Spotify token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Spotify token request failed: status={} body={}", status, body.trim());
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse Spotify token response")?;
        if token.access_token.trim().is_empty() {
            anyhow::bail!("Spotify token response missing access_token");
        }
        Ok(token.access_token)
    }

    async fn list_via_api(&self, playlist_id: &str, token: &str) -> Result<Vec<RemoteTrack>> {
        let mut next = Some(format!("{}/playlists/{}/tracks?limit=100", API_BASE, playlist_id));
        let mut tracks = Vec::new();
        let mut seen = HashSet::new();

        while let Some(url) = next.take().filter(|u| !u.trim().is_empty()) {
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .context("Spotify playlist request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Spotify playlist request failed: status={} body={}", status, body.trim());
            }

            let page: TrackPage = response
                .json()
                .await
                .context("Failed to parse Spotify playlist page")?;
            tracks.extend(page.items.into_iter().filter_map(|item| {
                let track = item.track?;
                let id = extract_track_id(track.id.as_deref()?)?;
                if !seen.insert(id.clone()) {
                    return None;
                }
                let url = track
                    .external_urls
                    .get("spotify")
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| track_url(&id));
                Some(RemoteTrack {
                    artist: track
                        .artists
                        .first()
                        .map(|a| a.name.trim().to_string())
                        .unwrap_or_default(),
                    title: track.name.trim().to_string(),
                    url,
                    id,
                })
            }));
            next = page.next;
        }

        Ok(tracks)
    }

    async fn list_via_page(&self, playlist_id: &str) -> Result<Vec<RemoteTrack>> {
        let url = format!("{}/playlist/{}", PAGE_BASE, playlist_id);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Spotify playlist page request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Spotify playlist page request failed: status={}", status);
        }
        let body = response
            .text()
            .await
            .context("Failed to read Spotify playlist page")?;

        let ids = track_ids_from_html(&body);
        if ids.is_empty() {
            anyhow::bail!("Spotify playlist page did not expose track IDs");
        }
        warn!("Using playlist page scrape for {} ({} tracks, no titles)", playlist_id, ids.len());
        Ok(ids
            .into_iter()
            .map(|id| RemoteTrack {
                url: track_url(&id),
                title: id.clone(),
                artist: String::new(),
                id,
            })
            .collect())
    }
}

#[async_trait]
impl RemoteListing for SpotifyListing {
    async fn list(&self, source: &Source, cancel: &CancellationToken) -> Result<Vec<RemoteTrack>> {
        let playlist_id = resolve_playlist_id(&source.url)?;
        tokio::select! {
            tracks = self.list_playlist(&playlist_id) => tracks,
            _ = cancel.cancelled() => anyhow::bail!("listing playlist {} cancelled", playlist_id),
        }
    }
}

/// Playlist ID from a playlist URL or `spotify:playlist:` URI
pub fn resolve_playlist_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Spotify url must not be empty");
    }

    if trimmed.to_lowercase().starts_with("spotify:playlist:") {
        let id = &trimmed["spotify:playlist:".len()..];
        return extract_track_id(id)
            .ok_or_else(|| anyhow::anyhow!("invalid Spotify playlist id in {:?}", raw));
    }

    let parsed = url::Url::parse(trimmed).with_context(|| format!("Failed to parse Spotify url {:?}", raw))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    segments
        .iter()
        .position(|seg| *seg == "playlist")
        .and_then(|pos| segments.get(pos + 1))
        .and_then(|id| extract_track_id(id))
        .ok_or_else(|| anyhow::anyhow!("Spotify playlist id not found in {:?}", raw))
}

/// Unique track IDs referenced by a playlist page, in page order
pub fn track_ids_from_html(document: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TRACK_REF
        .captures_iter(document)
        .filter_map(|caps| extract_track_id(caps.get(1)?.as_str()))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

pub fn track_url(id: &str) -> String {
    format!("{}/track/{}", PAGE_BASE, id)
}
