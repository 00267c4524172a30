//! Partial-download cleanup
//!
//! Snapshot in-progress files before a run, and after a failed run delete only
//! the ones that appeared since. Leftovers from earlier sessions stay put.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const COMMON_SUFFIXES: &[&str] = &[".part", ".ytdl"];
const SCDL_SUFFIXES: &[&str] = &[".scdl.lock", ".jpg", ".jpeg", ".png", ".webp"];

/// In-progress file suffixes a downloader may leave behind
pub fn suffixes_for_adapter(kind: &str) -> Vec<&'static str> {
    let mut suffixes = COMMON_SUFFIXES.to_vec();
    if kind == "scdl" {
        suffixes.extend_from_slice(SCDL_SUFFIXES);
    }
    suffixes
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    paths: BTreeSet<PathBuf>,
}

impl ArtifactSnapshot {
    /// Recursively collect files under `dir` ending in one of `suffixes`
    ///
    /// A missing directory is an empty snapshot.
    pub fn capture(dir: &Path, suffixes: &[&str]) -> Result<Self> {
        let mut snapshot = Self::default();
        if suffixes.is_empty() {
            return Ok(snapshot);
        }
        match fs::metadata(dir) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(snapshot),
            Err(e) => return Err(e).with_context(|| format!("Failed to stat {:?}", dir)),
        }
        collect(dir, suffixes, &mut snapshot.paths)?;
        Ok(snapshot)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Delete matching files not present in this snapshot, returning them sorted
    pub fn remove_new(&self, dir: &Path, suffixes: &[&str]) -> Result<Vec<PathBuf>> {
        let current = Self::capture(dir, suffixes)?;
        let mut removed = Vec::new();
        for path in current.paths.difference(&self.paths) {
            match fs::remove_file(path) {
                Ok(()) => removed.push(path.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
            }
        }
        Ok(removed)
    }
}

fn collect(dir: &Path, suffixes: &[&str], out: &mut BTreeSet<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect(&path, suffixes, out)?;
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if suffixes.iter().any(|suffix| name.ends_with(suffix)) {
            out.insert(path);
        }
    }
    Ok(())
}
