//! Preflight reconciliation
//!
//! Classifies every remote track before the downloader runs:
//!
//! - **archive gap**: no persisted record knows the ID
//! - **known gap**: recorded as downloaded, but no matching file on disk
//! - **present**: recorded and matched to a local file, either through the
//!   recorded path or by normalized title against the [`LocalMediaIndex`]
//!
//! The planned download set depends on [`PreflightMode`]. Break mode only
//! plans gaps that sit before the first present track, mirroring a
//! downloader's stop-at-first-existing behaviour while still healing deleted
//! files above that point. Scan-gaps mode plans every gap.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::library::{is_media_path, LocalMediaIndex};
use crate::remote::RemoteTrack;
use crate::state::{ArchiveIds, SoundCloudSyncState, SpotifySyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightMode {
    Break,
    ScanGaps,
}

impl fmt::Display for PreflightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightMode::Break => write!(f, "break"),
            PreflightMode::ScanGaps => write!(f, "scan_gaps"),
        }
    }
}

/// Reconciliation summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preflight {
    pub remote_total: usize,
    pub known_count: usize,
    pub archive_gap_count: usize,
    pub known_gap_count: usize,
    /// 1-based position of the first present track, 0 when none
    pub first_existing_index: usize,
    pub planned_download_count: usize,
    pub mode: PreflightMode,
}

/// Full reconciliation result
#[derive(Debug, Clone)]
pub struct Plan {
    pub preflight: Preflight,
    pub archive_gaps: HashSet<String>,
    pub known_gaps: HashSet<String>,
    /// Planned IDs in remote order
    pub planned: Vec<String>,
}

impl Plan {
    /// Planned IDs the downloader's own records would make it skip
    pub fn planned_known_gaps(&self) -> HashSet<String> {
        self.planned
            .iter()
            .filter(|id| self.known_gaps.contains(*id))
            .cloned()
            .collect()
    }
}

/// What the persisted records say about a track
pub trait TrackRecords {
    fn is_known(&self, id: &str) -> bool;

    /// Path the track was saved under, relative to the target dir or absolute
    fn recorded_path(&self, id: &str) -> Option<&str>;

    fn display_name(&self, _id: &str) -> Option<&str> {
        None
    }

    /// Recorded files only count when they carry a media extension
    fn requires_media_extension(&self) -> bool {
        true
    }
}

/// scdl sync state plus the yt-dlp archive
pub struct SoundCloudRecords<'a> {
    pub state: &'a SoundCloudSyncState,
    pub archive: &'a ArchiveIds,
}

impl TrackRecords for SoundCloudRecords<'_> {
    fn is_known(&self, id: &str) -> bool {
        self.state.contains(id) || self.archive.contains(id)
    }

    fn recorded_path(&self, id: &str) -> Option<&str> {
        self.state.file_path(id)
    }

    fn requires_media_extension(&self) -> bool {
        false
    }
}

impl TrackRecords for SpotifySyncState {
    fn is_known(&self, id: &str) -> bool {
        self.contains(id)
    }

    fn recorded_path(&self, id: &str) -> Option<&str> {
        self.entry(id).and_then(|e| e.local_path.as_deref())
    }

    fn display_name(&self, id: &str) -> Option<&str> {
        self.entry(id).and_then(|e| e.display_name.as_deref())
    }
}

/// Whether any known track would need a title lookup
///
/// Scanning a large library is the expensive part of preflight, so it is
/// skipped when every known track still has its recorded file.
pub fn needs_local_index(tracks: &[RemoteTrack], records: &dyn TrackRecords, target_dir: &Path) -> bool {
    let mut consumed = HashSet::new();
    tracks.iter().any(|track| {
        records.is_known(&track.id)
            && !recorded_file_present(records, &track.id, target_dir, &mut consumed)
    })
}

/// Classify `tracks` and compute the download plan
///
/// `index` is consumed: every title match uses up one file, so one physical
/// file never satisfies two tracks. Repeated IDs in the listing are ignored
/// after their first occurrence.
pub fn reconcile(
    tracks: &[RemoteTrack],
    records: &dyn TrackRecords,
    mut index: LocalMediaIndex,
    target_dir: &Path,
    mode: PreflightMode,
) -> Plan {
    let mut seen = HashSet::new();
    let tracks: Vec<&RemoteTrack> = tracks.iter().filter(|t| seen.insert(t.id.as_str())).collect();

    let mut archive_gaps = HashSet::new();
    let mut known_gaps = HashSet::new();
    let mut consumed_paths = HashSet::new();
    let mut known_count = 0;
    let mut first_existing_index = 0;

    for (i, track) in tracks.iter().enumerate() {
        if !records.is_known(&track.id) {
            archive_gaps.insert(track.id.clone());
            continue;
        }
        known_count += 1;

        let present = recorded_file_present(records, &track.id, target_dir, &mut consumed_paths)
            || track
                .title_candidates(records.display_name(&track.id))
                .iter()
                .any(|candidate| index.consume(candidate));

        if present {
            if first_existing_index == 0 {
                first_existing_index = i + 1;
            }
        } else {
            known_gaps.insert(track.id.clone());
        }
    }

    let limit = match mode {
        PreflightMode::ScanGaps => tracks.len(),
        PreflightMode::Break if first_existing_index > 0 => first_existing_index - 1,
        PreflightMode::Break => tracks.len(),
    };
    let planned: Vec<String> = tracks[..limit]
        .iter()
        .filter(|t| archive_gaps.contains(&t.id) || known_gaps.contains(&t.id))
        .map(|t| t.id.clone())
        .collect();

    Plan {
        preflight: Preflight {
            remote_total: tracks.len(),
            known_count,
            archive_gap_count: archive_gaps.len(),
            known_gap_count: known_gaps.len(),
            first_existing_index,
            planned_download_count: planned.len(),
            mode,
        },
        archive_gaps,
        known_gaps,
        planned,
    }
}

/// Recorded path exists as a file not already claimed by another track
fn recorded_file_present<'a>(
    records: &'a dyn TrackRecords,
    id: &str,
    target_dir: &Path,
    consumed: &mut HashSet<&'a str>,
) -> bool {
    let Some(raw) = records.recorded_path(id).map(str::trim).filter(|p| !p.is_empty()) else {
        return false;
    };
    if consumed.contains(raw) {
        return false;
    }

    let candidate = Path::new(raw);
    let full = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        target_dir.join(candidate)
    };
    if !full.is_file() || (records.requires_media_extension() && !is_media_path(&full)) {
        return false;
    }

    consumed.insert(raw);
    true
}
