//! Temporary state substitution around a downloader run
//!
//! When the plan wants scdl to re-fetch tracks its own sync and archive files
//! would make it skip, we hand it filtered copies instead and rename them over
//! the originals only after a successful run.
//!
//! The two renames are not atomic as a pair. Before renaming, `commit` writes a
//! journal (`<sync-file>.commit.json`) naming both; `recover` replays any
//! journal left behind by a crash so the two files cannot stay out of step.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::archive;
use super::soundcloud::{parent_dir, SoundCloudSyncState};

const JOURNAL_SUFFIX: &str = ".commit.json";

/// A temp file waiting to replace an original
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRename {
    pub temp: PathBuf,
    pub original: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    renames: Vec<PendingRename>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct StateSwap {
    sync: Option<PendingRename>,
    archive: Option<PendingRename>,
}

impl StateSwap {
    /// A swap with nothing to do
    pub fn empty() -> Self {
        Self::default()
    }

    /// Write filtered copies of both files with `remove` taken out
    ///
    /// With nothing to remove no files are created and the swap is empty.
    pub fn prepare(
        sync_path: &Path,
        state: &SoundCloudSyncState,
        archive_path: &Path,
        archive_tag: &str,
        remove: &HashSet<String>,
    ) -> Result<Self> {
        if remove.is_empty() {
            return Ok(Self::empty());
        }

        let temp_sync = state
            .write_filtered(sync_path, remove)
            .context("prepare temporary sync state file")?;
        let temp_archive = match archive::write_filtered(archive_path, archive_tag, remove) {
            Ok(path) => path,
            Err(e) => {
                let _ = remove_if_exists(&temp_sync);
                return Err(e.context("prepare temporary archive file"));
            }
        };

        debug!(
            "Prepared state swap for {} ids: {} / {}",
            remove.len(),
            temp_sync.display(),
            temp_archive.display()
        );

        Ok(Self {
            sync: Some(PendingRename {
                temp: temp_sync,
                original: sync_path.to_path_buf(),
            }),
            archive: Some(PendingRename {
                temp: temp_archive,
                original: archive_path.to_path_buf(),
            }),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sync.is_none() && self.archive.is_none()
    }

    /// Path the downloader should use as its sync file, if swapped
    pub fn temp_sync_path(&self) -> Option<&Path> {
        self.sync.as_ref().map(|r| r.temp.as_path())
    }

    pub fn temp_archive_path(&self) -> Option<&Path> {
        self.archive.as_ref().map(|r| r.temp.as_path())
    }

    fn renames(&self) -> Vec<PendingRename> {
        self.sync.iter().chain(self.archive.iter()).cloned().collect()
    }

    /// Move the temp files over the originals
    ///
    /// On a failed rename the journal and remaining temp files are left for
    /// [`recover`] to finish on the next run.
    pub fn commit(self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let renames = self.renames();
        let journal = journal_path(&renames[0].original);
        write_journal(&journal, &renames)?;

        for rename in &renames {
            fs::rename(&rename.temp, &rename.original).with_context(|| {
                format!(
                    "Failed to move {:?} over {:?} (journal kept at {:?})",
                    rename.temp, rename.original, journal
                )
            })?;
        }

        remove_if_exists(&journal)
            .with_context(|| format!("Failed to remove commit journal {:?}", journal))?;
        debug!("Committed state swap for {}", renames[0].original.display());
        Ok(())
    }

    /// Delete the temp files, leaving originals untouched
    pub fn discard(self) -> Result<()> {
        let mut problems = Vec::new();
        for rename in self.renames() {
            if let Err(e) = remove_if_exists(&rename.temp) {
                problems.push(format!("{}: {}", rename.temp.display(), e));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("failed to remove temporary state files: {}", problems.join("; "))
        }
    }
}

pub fn journal_path(sync_path: &Path) -> PathBuf {
    let mut name = sync_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(JOURNAL_SUFFIX);
    sync_path.with_file_name(name)
}

/// Finish a commit interrupted by a crash
///
/// Returns the number of renames replayed. Renames whose temp file is already
/// gone were completed before the crash and are skipped.
pub fn recover(sync_path: &Path) -> Result<usize> {
    let journal = journal_path(sync_path);
    let raw = match fs::read(&journal) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", journal)),
    };

    let parsed: Journal = match serde_json::from_slice(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Crash while writing the journal: no rename had started yet
            warn!("Discarding unreadable commit journal {}: {}", journal.display(), e);
            remove_if_exists(&journal)?;
            return Ok(0);
        }
    };

    let mut replayed = 0;
    for rename in &parsed.renames {
        if !rename.temp.exists() {
            continue;
        }
        fs::rename(&rename.temp, &rename.original).with_context(|| {
            format!("Failed to replay {:?} -> {:?}", rename.temp, rename.original)
        })?;
        replayed += 1;
    }

    remove_if_exists(&journal)?;
    if replayed > 0 {
        info!("Recovered {} pending state rename(s) from {}", replayed, journal.display());
    }
    Ok(replayed)
}

fn write_journal(path: &Path, renames: &[PendingRename]) -> Result<()> {
    let dir = parent_dir(path);
    let encoded = serde_json::to_vec_pretty(&Journal {
        renames: renames.to_vec(),
    })
    .context("Failed to encode commit journal")?;

    let mut temp = NamedTempFile::with_prefix_in(".udl-journal-", dir)
        .context("Failed to create commit journal")?;
    temp.write_all(&encoded)
        .context("Failed to write commit journal")?;
    temp.as_file()
        .sync_all()
        .context("Failed to sync commit journal")?;
    temp.persist(path)
        .with_context(|| format!("Failed to place commit journal at {:?}", path))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn fixture(dir: &Path) -> (PathBuf, PathBuf, SoundCloudSyncState) {
        let sync = dir.join("likes.sync.scdl");
        let archive = dir.join("likes.archive.txt");
        fs::write(&sync, "soundcloud 1 one.m4a\nsoundcloud 2 two.m4a\n").unwrap();
        fs::write(&archive, "soundcloud 1\nsoundcloud 2\n").unwrap();
        let state = SoundCloudSyncState::load(&sync).unwrap();
        (sync, archive, state)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_empty_swap_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, archive, state) = fixture(dir.path());
        let before = entries(dir.path());

        let swap = StateSwap::prepare(&sync, &state, &archive, "soundcloud", &HashSet::new()).unwrap();
        assert!(swap.is_empty());
        assert!(swap.temp_sync_path().is_none());
        swap.commit().unwrap();

        assert_eq!(entries(dir.path()), before);
    }

    #[test]
    fn test_commit_replaces_originals() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, archive, state) = fixture(dir.path());

        let swap = StateSwap::prepare(&sync, &state, &archive, "soundcloud", &ids(&["2"])).unwrap();
        let temp_sync = swap.temp_sync_path().unwrap().to_path_buf();
        assert!(temp_sync.exists());
        swap.commit().unwrap();

        assert!(!temp_sync.exists());
        assert!(!journal_path(&sync).exists());
        assert_eq!(fs::read_to_string(&sync).unwrap(), "soundcloud 1 one.m4a\n");
        assert_eq!(fs::read_to_string(&archive).unwrap(), "soundcloud 1\n");
    }

    #[test]
    fn test_discard_keeps_originals() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, archive, state) = fixture(dir.path());
        let before = entries(dir.path());

        let swap = StateSwap::prepare(&sync, &state, &archive, "soundcloud", &ids(&["1"])).unwrap();
        assert_eq!(entries(dir.path()).len(), before.len() + 2);
        swap.discard().unwrap();

        assert_eq!(entries(dir.path()), before);
        assert!(fs::read_to_string(&sync).unwrap().contains("soundcloud 1"));
    }

    #[test]
    fn test_recover_replays_interrupted_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (sync, archive, state) = fixture(dir.path());
        let swap = StateSwap::prepare(&sync, &state, &archive, "soundcloud", &ids(&["1"])).unwrap();

        // Simulate a crash after the first rename
        let renames = swap.renames();
        write_journal(&journal_path(&sync), &renames).unwrap();
        fs::rename(&renames[0].temp, &renames[0].original).unwrap();

        assert_eq!(recover(&sync).unwrap(), 1);
        assert!(!journal_path(&sync).exists());
        assert_eq!(fs::read_to_string(&sync).unwrap(), "soundcloud 2 two.m4a\n");
        assert_eq!(fs::read_to_string(&archive).unwrap(), "soundcloud 2\n");
    }

    #[test]
    fn test_recover_without_journal_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(recover(&dir.path().join("x.sync")).unwrap(), 0);
    }

    #[test]
    fn test_recover_drops_corrupt_journal() {
        let dir = tempfile::tempdir().unwrap();
        let sync = dir.path().join("x.sync");
        fs::write(journal_path(&sync), b"{\"renames\": [").unwrap();
        assert_eq!(recover(&sync).unwrap(), 0);
        assert!(!journal_path(&sync).exists());
    }
}
