//! yt-dlp `--download-archive` file: `<extractor> <id>` per line

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::Builder;

use super::read_optional;
use super::soundcloud::parent_dir;

/// IDs recorded under one extractor tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIds {
    ids: HashSet<String>,
}

impl ArchiveIds {
    pub fn load(path: &Path, tag: &str) -> Result<Self> {
        let contents = read_optional(path)
            .with_context(|| format!("Failed to load archive {:?}", path))?;
        Ok(contents
            .as_deref()
            .map(|text| Self::parse(text, tag))
            .unwrap_or_default())
    }

    pub fn parse(text: &str, tag: &str) -> Self {
        let ids = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next()) {
                    (Some(t), Some(id)) if t == tag => Some(id.to_string()),
                    _ => None,
                }
            })
            .collect();
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Copy `original` without `<tag> <id>` lines for the given ids
///
/// Other tags and blank lines survive. A missing original yields an empty copy.
pub fn write_filtered(original: &Path, tag: &str, remove: &HashSet<String>) -> Result<PathBuf> {
    let dir = parent_dir(original);
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create archive directory {:?}", dir))?;

    let contents = read_optional(original)?.unwrap_or_default();

    let mut temp = Builder::new()
        .prefix(".udl-archive-")
        .suffix(".txt")
        .tempfile_in(dir)
        .context("Failed to create temporary archive")?;

    for raw in contents.lines() {
        let mut fields = raw.split_whitespace();
        let drop = match (fields.next(), fields.next()) {
            (Some(t), Some(id)) => t == tag && remove.contains(id),
            _ => false,
        };
        if drop {
            continue;
        }
        if raw.trim().is_empty() {
            writeln!(temp).context("Failed to write temporary archive")?;
        } else {
            writeln!(temp, "{}", raw).context("Failed to write temporary archive")?;
        }
    }
    temp.as_file()
        .sync_all()
        .context("Failed to sync temporary archive")?;

    let (_, path) = temp.keep().context("Failed to keep temporary archive")?;
    Ok(path)
}
