//! Path resolution for target directories and state files

use anyhow::Result;
use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` and normalize `.`/`..` components lexically
pub fn expand_path(raw: &Path) -> Result<PathBuf> {
    let text = raw.to_string_lossy();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(PathBuf::new());
    }

    let expanded = if trimmed == "~" || trimmed.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        home.join(trimmed.trim_start_matches('~').trim_start_matches('/'))
    } else {
        PathBuf::from(trimmed)
    };

    Ok(clean(&expanded))
}

/// Resolve a state file against the state directory
pub fn resolve_state_file(state_dir: &Path, state_file: &Path) -> Result<PathBuf> {
    let expanded = expand_path(state_file)?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    Ok(clean(&expand_path(state_dir)?.join(expanded)))
}

/// Resolve the archive file for a source
///
/// A bare file name becomes `<state_dir>/<source_id>.<name>` so sources never
/// share an archive by accident. Nested relative paths and absolute paths are
/// taken as written.
pub fn resolve_archive_file(state_dir: &Path, archive_file: &str, source_id: &str) -> Result<PathBuf> {
    let trimmed = archive_file.trim();
    let name = if trimmed.is_empty() { "archive.txt" } else { trimmed };
    let expanded = expand_path(Path::new(name))?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }

    let is_bare = expanded.components().count() == 1;
    let source_id = source_id.trim();
    if is_bare && !source_id.is_empty() {
        let per_source = format!("{}.{}", source_id, name);
        return Ok(clean(&expand_path(state_dir)?.join(per_source)));
    }
    Ok(clean(&expand_path(state_dir)?.join(expanded)))
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_file_per_source_for_simple_name() {
        let got = resolve_archive_file(Path::new("/tmp/state"), "archive.txt", "soundcloud-a").unwrap();
        assert_eq!(got, PathBuf::from("/tmp/state/soundcloud-a.archive.txt"));
    }

    #[test]
    fn test_archive_file_keeps_nested_relative_path() {
        let got = resolve_archive_file(Path::new("/tmp/state"), "archives/soundcloud.txt", "soundcloud-a")
            .unwrap();
        assert_eq!(got, PathBuf::from("/tmp/state/archives/soundcloud.txt"));
    }

    #[test]
    fn test_archive_file_absolute_is_untouched() {
        let got = resolve_archive_file(Path::new("/tmp/state"), "/var/archive.txt", "a").unwrap();
        assert_eq!(got, PathBuf::from("/var/archive.txt"));
    }

    #[test]
    fn test_state_file_relative_and_absolute() {
        let state_dir = Path::new("/tmp/state");
        assert_eq!(
            resolve_state_file(state_dir, Path::new("a.sync.scdl")).unwrap(),
            PathBuf::from("/tmp/state/a.sync.scdl")
        );
        assert_eq!(
            resolve_state_file(state_dir, Path::new("/elsewhere/a.sync")).unwrap(),
            PathBuf::from("/elsewhere/a.sync")
        );
    }

    #[test]
    fn test_expand_path_cleans_components() {
        assert_eq!(
            expand_path(Path::new("/music/./sc/../likes")).unwrap(),
            PathBuf::from("/music/likes")
        );
        assert_eq!(expand_path(Path::new("  ")).unwrap(), PathBuf::new());
    }
}
