//! Normalized title index of media files present in a target directory

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Extensions treated as downloaded media
const MEDIA_EXTENSIONS: &[&str] = &["m4a", "mp3", "flac", "opus", "ogg", "wav", "aac"];

/// Tokens uploaders sprinkle into titles that never appear consistently in file names
const FILLER_TOKENS: &[&str] = &["free", "dl", "master"];

/// Map of normalized title key to the number of files carrying that key
///
/// Matching consumes counts, so an index is only good for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalMediaIndex {
    counts: BTreeMap<String, usize>,
}

impl LocalMediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the top level of `dir` for media files
    ///
    /// An unreadable directory yields an empty index; the caller then treats
    /// every title lookup as a miss.
    pub fn scan(dir: &Path) -> Self {
        let mut index = Self::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {} for local index: {}", dir.display(), e);
                return index;
            }
        };

        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            if !is_media_path(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            index.insert(&stem);
        }

        debug!("Indexed {} local titles in {}", index.total(), dir.display());
        index
    }

    /// Record one file with the given title
    pub fn insert(&mut self, title: &str) {
        let key = normalize_track_key(title);
        if key.is_empty() {
            return;
        }
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Consume one file matching `title`, if any is left
    pub fn consume(&mut self, title: &str) -> bool {
        let key = normalize_track_key(title);
        if key.is_empty() {
            return false;
        }
        match self.counts.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn available(&self, title: &str) -> usize {
        self.counts
            .get(&normalize_track_key(title))
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct keys
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of indexed files
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

pub fn is_media_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// Lossy title key: lowercase, punctuation to spaces, collapsed whitespace,
/// filler tokens dropped
///
/// When every token is filler the collapsed form is kept, so a track literally
/// titled "Free" still has a key.
pub fn normalize_track_key(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return String::new();
    }

    let collapsed: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let tokens: Vec<&str> = collapsed.split_whitespace().collect();

    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|token| !FILLER_TOKENS.contains(token))
        .collect();

    if kept.is_empty() {
        tokens.join(" ")
    } else {
        kept.join(" ")
    }
}
