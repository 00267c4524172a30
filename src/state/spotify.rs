//! Spotify state file
//!
//! ```text
//! # udl spotify state v2
//! 4uLU6hMCjMI75M1A2tKUQC	title=Artist+-+Song	path=Artist+-+Song.mp3
//! ```
//!
//! The `title=` and `path=` fields are optional and query-encoded. Older files
//! carry bare IDs, `spotify <id>` pairs, or full track URLs; all still parse.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path};

use super::read_optional;
use super::soundcloud::parent_dir;

pub const STATE_HEADER: &str = "# udl spotify state v2";

static TRACK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{10,32}$").expect("valid track id pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotifyEntry {
    pub display_name: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SpotifySyncState {
    known: HashSet<String>,
    entries: HashMap<String, SpotifyEntry>,
}

impl SpotifySyncState {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_optional(path)
            .with_context(|| format!("Failed to load Spotify state {:?}", path))?;
        Ok(contents.as_deref().map(Self::parse).unwrap_or_default())
    }

    pub fn parse(text: &str) -> Self {
        let mut state = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((id, entry)) = parse_line(line) else {
                continue;
            };

            state.known.insert(id.clone());
            if entry.display_name.is_none() && entry.local_path.is_none() {
                continue;
            }
            let existing = state.entries.entry(id).or_default();
            if entry.display_name.is_some() {
                existing.display_name = entry.display_name;
            }
            if entry.local_path.is_some() {
                existing.local_path = entry.local_path;
            }
        }
        state
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    pub fn entry(&self, id: &str) -> Option<&SpotifyEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Parse one non-comment line into an ID and its optional fields
pub fn parse_line(line: &str) -> Option<(String, SpotifyEntry)> {
    let raw = line.trim();
    if raw.is_empty() {
        return None;
    }

    let mut parts = raw.split('\t');
    let first = parts.next().unwrap_or_default().trim();
    let Some(id) = extract_track_id(first) else {
        // Legacy layouts without tab-separated fields
        let id = extract_track_id(raw).or_else(|| {
            let mut fields = raw.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("spotify"), Some(candidate)) => extract_track_id(candidate),
                _ => None,
            }
        })?;
        return Some((id, SpotifyEntry::default()));
    };

    let mut entry = SpotifyEntry::default();
    for field in parts {
        let field = field.trim();
        if let Some(value) = field.strip_prefix("title=") {
            entry.display_name = non_empty(decode_value(value));
        } else if let Some(value) = field.strip_prefix("path=") {
            entry.local_path = normalize_state_path(&decode_value(value));
        } else if entry.display_name.is_none() {
            entry.display_name = non_empty(field.to_string());
        }
    }
    Some((id, entry))
}

/// Append one entry, writing the header first when the file is new or empty
pub fn append_entry(
    path: &Path,
    id: &str,
    display_name: Option<&str>,
    local_path: Option<&str>,
) -> Result<()> {
    let track_id = extract_track_id(id)
        .ok_or_else(|| anyhow::anyhow!("invalid Spotify track id {:?}", id))?;

    let dir = parent_dir(path);
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create state directory {:?}", dir))?;

    let needs_header = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {:?}", path)),
    };

    let mut fields = vec![track_id];
    if let Some(title) = display_name.map(str::trim).filter(|t| !t.is_empty()) {
        fields.push(format!("title={}", encode_value(title)));
    }
    if let Some(normalized) = local_path.and_then(normalize_state_path) {
        fields.push(format!("path={}", encode_value(&normalized)));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?} for append", path))?;
    if needs_header {
        writeln!(file, "{}", STATE_HEADER)?;
    }
    writeln!(file, "{}", fields.join("\t"))
        .with_context(|| format!("Failed to append to {:?}", path))?;
    Ok(())
}

/// Pull a track ID out of a bare ID, a track URL, or a `spotify:track:` URI
pub fn extract_track_id(value: &str) -> Option<String> {
    let mut candidate = value.trim().to_string();
    if candidate.is_empty() {
        return None;
    }

    if candidate.starts_with("https://") || candidate.starts_with("http://") {
        if let Ok(parsed) = url::Url::parse(&candidate) {
            let segments: Vec<&str> = parsed
                .path_segments()
                .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                .unwrap_or_default();
            if let Some(pos) = segments.iter().position(|seg| *seg == "track") {
                if let Some(next) = segments.get(pos + 1) {
                    candidate = next.trim().to_string();
                }
            }
        }
    }

    if candidate.to_lowercase().starts_with("spotify:track:") {
        candidate = candidate["spotify:track:".len()..].trim().to_string();
    }

    TRACK_ID.is_match(&candidate).then_some(candidate)
}

/// Query-style encoding: spaces become `+`
pub fn encode_value(raw: &str) -> String {
    urlencoding::encode(raw.trim()).replace("%20", "+")
}

/// Inverse of [`encode_value`]; undecodable input comes back trimmed
pub fn decode_value(raw: &str) -> String {
    let trimmed = raw.trim();
    let spaced = trimmed.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Relative, slash-separated form of a stored path
///
/// Leading `/` and `./` are stripped. Anything escaping the target directory
/// via `..` is rejected.
pub fn normalize_state_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().replace('\\', "/");
    if trimmed.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_A: &str = "4uLU6hMCjMI75M1A2tKUQC";
    const ID_B: &str = "7ouMYWpwJ422jRcDASZB7P";

    #[test]
    fn test_extract_track_id_forms() {
        assert_eq!(extract_track_id(ID_A).as_deref(), Some(ID_A));
        assert_eq!(
            extract_track_id(&format!("https://open.spotify.com/track/{ID_A}?si=abc")).as_deref(),
            Some(ID_A)
        );
        assert_eq!(
            extract_track_id(&format!("spotify:track:{ID_A}")).as_deref(),
            Some(ID_A)
        );
        assert_eq!(extract_track_id("short"), None);
        assert_eq!(extract_track_id("has-dash-in-the-id"), None);
    }

    #[test]
    fn test_parse_state_with_fields_and_legacy_lines() {
        let text = format!(
            "{STATE_HEADER}\n{ID_A}\ttitle=Artist+-+Song%21\tpath=.%2Fsub%2FSong.mp3\nspotify {ID_B}\n\n"
        );
        let state = SpotifySyncState::parse(&text);
        assert_eq!(state.len(), 2);
        assert!(state.contains(ID_B));

        let entry = state.entry(ID_A).unwrap();
        assert_eq!(entry.display_name.as_deref(), Some("Artist - Song!"));
        assert_eq!(entry.local_path.as_deref(), Some("sub/Song.mp3"));
        assert!(state.entry(ID_B).is_none());
    }

    #[test]
    fn test_append_entry_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("playlist.spotify");

        append_entry(&path, ID_A, Some("Artist - Song"), Some("Artist - Song.mp3")).unwrap();
        append_entry(&path, &format!("spotify:track:{ID_B}"), None, None).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            format!(
                "{STATE_HEADER}\n{ID_A}\ttitle=Artist+-+Song\tpath=Artist+-+Song.mp3\n{ID_B}\n"
            )
        );

        let state = SpotifySyncState::load(&path).unwrap();
        assert_eq!(
            state.entry(ID_A).and_then(|e| e.local_path.as_deref()),
            Some("Artist - Song.mp3")
        );
    }

    #[test]
    fn test_append_entry_rejects_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        assert!(append_entry(&dir.path().join("s"), "nope", None, None).is_err());
    }

    #[test]
    fn test_normalize_state_path() {
        assert_eq!(normalize_state_path("/a/./b.mp3").as_deref(), Some("a/b.mp3"));
        assert_eq!(normalize_state_path("a/../b.mp3").as_deref(), Some("b.mp3"));
        assert_eq!(normalize_state_path("../escape.mp3"), None);
        assert_eq!(normalize_state_path("."), None);
        assert_eq!(normalize_state_path("  "), None);
    }
}
