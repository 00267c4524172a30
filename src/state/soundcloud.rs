//! scdl `--sync` state file
//!
//! One line per downloaded track, `soundcloud <id> <path>`. scdl owns the
//! format, so lines we do not understand are carried through verbatim.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::debug;

use super::read_optional;

const TAG: &str = "soundcloud";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    /// Trimmed line as read
    pub raw_line: String,
    /// Set only for recognized `soundcloud <id> <path>` lines
    pub id: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SoundCloudSyncState {
    entries: Vec<SyncEntry>,
    by_id: HashMap<String, usize>,
}

impl SoundCloudSyncState {
    /// Load from disk; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_optional(path)
            .with_context(|| format!("Failed to load sync state {:?}", path))?;
        let state = contents.as_deref().map(Self::parse).unwrap_or_default();
        debug!("Loaded {} sync-state ids from {}", state.len(), path.display());
        Ok(state)
    }

    pub fn parse(text: &str) -> Self {
        let mut state = Self::default();
        for line in text.lines() {
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }

            let mut entry = SyncEntry {
                raw_line: raw.to_string(),
                id: None,
                file_path: None,
            };
            let parts: Vec<&str> = raw.splitn(3, ' ').collect();
            if parts.len() == 3 && parts[0].trim() == TAG {
                let id = parts[1].trim();
                if !id.is_empty() {
                    entry.id = Some(id.to_string());
                    entry.file_path = Some(parts[2].trim().to_string());
                }
            }

            if let Some(id) = &entry.id {
                state.by_id.insert(id.clone(), state.entries.len());
            }
            state.entries.push(entry);
        }
        state
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Recorded file path for `id` (later lines win)
    pub fn file_path(&self, id: &str) -> Option<&str> {
        self.by_id
            .get(id)
            .and_then(|&i| self.entries[i].file_path.as_deref())
            .filter(|p| !p.is_empty())
    }

    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    /// Number of distinct recognized ids
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Write a copy without the given ids next to `original`, returning its path
    ///
    /// The copy is a fresh `.udl-sync-*.scdl` file in the same directory so a
    /// later rename over `original` stays on one filesystem.
    pub fn write_filtered(&self, original: &Path, remove: &HashSet<String>) -> Result<PathBuf> {
        let dir = parent_dir(original);
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;

        let mut temp = Builder::new()
            .prefix(".udl-sync-")
            .suffix(".scdl")
            .tempfile_in(dir)
            .context("Failed to create temporary sync state")?;

        for entry in &self.entries {
            if entry.id.as_ref().is_some_and(|id| remove.contains(id)) {
                continue;
            }
            writeln!(temp, "{}", entry.raw_line).context("Failed to write temporary sync state")?;
        }
        temp.as_file()
            .sync_all()
            .context("Failed to sync temporary sync state")?;

        let (_, path) = temp
            .keep()
            .context("Failed to keep temporary sync state")?;
        Ok(path)
    }
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
