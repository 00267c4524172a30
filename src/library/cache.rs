//! Persisted local index keyed by a cheap directory signature
//!
//! A cache problem of any kind is a miss, never an error: callers always have
//! a real scan to fall back on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::debug;

use super::LocalMediaIndex;

const CACHE_SCHEMA: u32 = 1;

/// Fields covered by the integrity digest
#[derive(Debug, Serialize)]
struct CachePayload<'a> {
    schema: u32,
    source_id: &'a str,
    target_dir: &'a str,
    target_signature: &'a str,
    index: &'a LocalMediaIndex,
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    schema: u32,
    source_id: String,
    target_dir: String,
    target_signature: String,
    index: LocalMediaIndex,
    integrity_hash: String,
}

impl CacheRecord {
    fn digest(&self) -> Result<String> {
        payload_digest(&CachePayload {
            schema: self.schema,
            source_id: &self.source_id,
            target_dir: &self.target_dir,
            target_signature: &self.target_signature,
            index: &self.index,
        })
    }
}

/// Load a cached index, returning `None` on any mismatch or corruption
pub fn load(
    state_dir: &Path,
    source_id: &str,
    target_dir: &Path,
    signature: &str,
) -> Option<LocalMediaIndex> {
    let path = cache_path(state_dir, source_id);
    let raw = fs::read(&path).ok()?;

    let record: CacheRecord = match serde_json::from_slice(&raw) {
        Ok(record) => record,
        Err(e) => {
            debug!("Ignoring unreadable index cache {}: {}", path.display(), e);
            return None;
        }
    };

    if record.schema != CACHE_SCHEMA
        || record.source_id != source_id.trim()
        || record.target_dir != target_key(target_dir)
        || record.target_signature.is_empty()
        || record.target_signature != signature.trim()
    {
        debug!("Index cache {} is stale", path.display());
        return None;
    }

    match record.digest() {
        Ok(expected) if expected == record.integrity_hash.trim() => Some(record.index),
        _ => {
            debug!("Index cache {} failed integrity check", path.display());
            None
        }
    }
}

/// Persist an index atomically (temp file, fsync, rename)
pub fn store(
    state_dir: &Path,
    source_id: &str,
    target_dir: &Path,
    signature: &str,
    index: &LocalMediaIndex,
) -> Result<()> {
    let path = cache_path(state_dir, source_id);
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("cache path {:?} has no parent", path))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create cache directory {:?}", dir))?;

    let mut record = CacheRecord {
        schema: CACHE_SCHEMA,
        source_id: source_id.trim().to_string(),
        target_dir: target_key(target_dir),
        target_signature: signature.trim().to_string(),
        index: index.clone(),
        integrity_hash: String::new(),
    };
    record.integrity_hash = record.digest()?;

    let encoded = serde_json::to_vec_pretty(&record).context("Failed to serialize index cache")?;

    let mut temp = NamedTempFile::with_prefix_in(".udl-local-index-", dir)
        .context("Failed to create temporary index cache")?;
    temp.write_all(&encoded)
        .context("Failed to write temporary index cache")?;
    temp.as_file()
        .sync_all()
        .context("Failed to sync temporary index cache")?;
    temp.persist(&path)
        .with_context(|| format!("Failed to move index cache into place at {:?}", path))?;

    debug!("Stored index cache ({} files) at {}", index.total(), path.display());
    Ok(())
}

/// Cheap invalidation key from the directory's own mtime and size
///
/// This is an approximation: a delete and recreate that leaves both values
/// unchanged is not detected.
pub fn signature(target_dir: &Path) -> Result<String> {
    let meta = fs::metadata(target_dir)
        .with_context(|| format!("Failed to stat {:?}", target_dir))?;
    let modified = meta
        .modified()
        .context("Directory modification time unavailable")?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(format!("{}:{}", nanos, meta.len()))
}

pub fn cache_path(state_dir: &Path, source_id: &str) -> PathBuf {
    let id = source_id.trim();
    let name = if id.is_empty() {
        "local-index.json".to_string()
    } else {
        format!("{}.local-index.json", id)
    };
    state_dir.join(name)
}

fn target_key(target_dir: &Path) -> String {
    target_dir.to_string_lossy().trim().trim_end_matches('/').to_string()
}

fn payload_digest(payload: &CachePayload<'_>) -> Result<String> {
    let encoded = serde_json::to_vec(payload).context("Failed to encode cache payload")?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> LocalMediaIndex {
        let mut index = LocalMediaIndex::new();
        index.insert("Track One");
        index.insert("Track One");
        index.insert("Track Two");
        index
    }

    #[test]
    fn test_store_then_load_hits() {
        let state = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let sig = signature(target.path()).unwrap();
        let index = sample_index();

        store(state.path(), "sc-a", target.path(), &sig, &index).unwrap();
        let loaded = load(state.path(), "sc-a", target.path(), &sig);
        assert_eq!(loaded, Some(index));
    }

    #[test]
    fn test_changed_signature_misses() {
        let state = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let index = sample_index();

        store(state.path(), "sc-a", target.path(), "100:10", &index).unwrap();
        assert!(load(state.path(), "sc-a", target.path(), "200:10").is_none());
    }

    #[test]
    fn test_directory_change_invalidates_signature() {
        let state = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let before = signature(target.path()).unwrap();
        store(state.path(), "sc-a", target.path(), &before, &sample_index()).unwrap();

        // Directory size grows with entries on common filesystems, so this
        // changes the signature even within the same mtime tick.
        for i in 0..64 {
            fs::write(target.path().join(format!("a-much-longer-file-name-{i:03}.mp3")), b"x").unwrap();
        }
        let after = signature(target.path()).unwrap();
        assert_ne!(before, after);
        assert!(load(state.path(), "sc-a", target.path(), &after).is_none());
    }

    #[test]
    fn test_other_source_or_target_misses() {
        let state = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        store(state.path(), "sc-a", target.path(), "1:1", &sample_index()).unwrap();

        assert!(load(state.path(), "sc-b", target.path(), "1:1").is_none());
        assert!(load(state.path(), "sc-a", Path::new("/somewhere/else"), "1:1").is_none());
    }

    #[test]
    fn test_tampered_payload_misses() {
        let state = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        store(state.path(), "sc-a", target.path(), "1:1", &sample_index()).unwrap();

        let path = cache_path(state.path(), "sc-a");
        let mut record: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        record["index"]["track two"] = serde_json::json!(7);
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(load(state.path(), "sc-a", target.path(), "1:1").is_none());
    }

    #[test]
    fn test_garbage_file_misses() {
        let state = tempfile::tempdir().unwrap();
        fs::write(cache_path(state.path(), "sc-a"), b"{not json").unwrap();
        assert!(load(state.path(), "sc-a", Path::new("/t"), "1:1").is_none());
    }
}
