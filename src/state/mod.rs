//! On-disk records of what has already been downloaded
//!
//! Three formats live here: the scdl sync-state file, the yt-dlp style
//! archive file, and the Spotify state file. `swap` wraps the first two in a
//! temporary-copy transaction around a downloader run.

pub mod archive;
pub mod soundcloud;
pub mod spotify;
pub mod swap;

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub use archive::ArchiveIds;
pub use soundcloud::SoundCloudSyncState;
pub use spotify::SpotifySyncState;
pub use swap::StateSwap;

/// Read a text file, treating a missing file as empty
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", path)),
    }
}
