//! Source tree enumeration.
//!
//! Walks the source root with `walkdir`, prunes anything matched by the gitignore-style
//! exclude patterns, and collects regular files with `/`-separated relative paths.
//! Unreadable entries are collected as [`FileError`]s instead of aborting the walk.

use crate::snapshot::FileError;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A regular file discovered under the source root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Files sorted by relative path.
    pub files: Vec<SourceFile>,
    pub errors: Vec<FileError>,
    /// Entries pruned by exclude patterns; an excluded directory counts once.
    pub excluded: u64,
}

pub fn build_excludes(root: &Path, patterns: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
    }
    builder.build().map_err(|e| Error::InvalidPattern {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}

/// Converts `path` under `root` into a `/`-separated relative path.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Enumerates the files under `root`, which must be an existing directory.
///
/// Directories listed in `skip_dirs` are pruned like excluded ones.
pub fn scan_source(root: &Path, excludes: &Gitignore, skip_dirs: &[PathBuf]) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut excluded = 0u64;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir && skip_dirs.iter().any(|d| d == entry.path()) {
                debug!(path = %entry.path().display(), "Skipping destination folder");
                excluded += 1;
                return false;
            }
            if excludes.matched(entry.path(), is_dir).is_ignore() {
                debug!(path = %entry.path().display(), "Excluded");
                excluded += 1;
                return false;
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(Error::SourceNotFound {
                        path: root.display().to_string(),
                    });
                }
                let path = e
                    .path()
                    .map(|p| relative_key(root, p).unwrap_or_else(|| p.display().to_string()))
                    .unwrap_or_else(|| root.display().to_string());
                warn!(path = %path, error = %e, "Failed to scan entry");
                result.errors.push(FileError {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!(path = %entry.path().display(), "Skipping symlink");
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let Some(relative_path) = relative_key(root, entry.path()) else {
            let path = entry.path().display().to_string();
            warn!(path = %path, "Skipping path that is not valid UTF-8");
            result.errors.push(FileError {
                path,
                reason: "path is not valid UTF-8".to_string(),
            });
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %relative_path, error = %e, "Failed to read metadata");
                result.errors.push(FileError {
                    path: relative_path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        result.files.push(SourceFile {
            path: entry.path().to_path_buf(),
            relative_path,
            size: metadata.len(),
            modified,
        });
    }

    result.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    result.excluded = excluded;
    Ok(result)
}
