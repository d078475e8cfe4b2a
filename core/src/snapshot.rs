use crate::{ContentHash, Error, HashAlgorithm, Result, SnapshotId, SnapshotKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub modified_time: DateTime<Utc>,
}

/// A source file that could not be read during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_checked: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub files_excluded: u64,
    pub bytes_copied: u64,
    pub errors: Vec<FileError>,
}

/// One backup run's output. Serialized as the snapshot's `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub snapshot_id: SnapshotId,
    pub kind: SnapshotKind,
    pub base_snapshot_id: Option<SnapshotId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub hostname: String,
    pub hash_algorithm: HashAlgorithm,
    #[serde(default)]
    pub excludes: Vec<String>,
    pub manifest: Vec<ManifestEntry>,
    #[serde(default)]
    pub removed: Vec<String>,
    pub summary: RunSummary,
}

impl Snapshot {
    pub fn new(
        snapshot_id: SnapshotId,
        kind: SnapshotKind,
        source_root: PathBuf,
        hash_algorithm: HashAlgorithm,
    ) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let now = Utc::now();

        Self {
            format_version: MANIFEST_VERSION,
            snapshot_id,
            kind,
            base_snapshot_id: None,
            created_at: now,
            completed_at: now,
            source_root,
            hostname,
            hash_algorithm,
            excludes: Vec::new(),
            manifest: Vec::new(),
            removed: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn with_base(mut self, base: SnapshotId) -> Self {
        self.base_snapshot_id = Some(base);
        self
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let json_data = serde_json::to_vec_pretty(self)?;
        Ok(Bytes::from(json_data))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(data)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks manifest invariants: supported version, unique and contained relative paths,
    /// and digests of the recorded algorithm's length.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidManifest {
            id: self.snapshot_id.to_string(),
            reason,
        };

        if self.format_version != MANIFEST_VERSION {
            return Err(invalid(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        if self.kind == SnapshotKind::Full && self.base_snapshot_id.is_some() {
            return Err(invalid("full snapshot must not have a base".to_string()));
        }
        if self.kind == SnapshotKind::Incremental && self.base_snapshot_id.is_none() {
            return Err(invalid("incremental snapshot has no base".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &self.manifest {
            if !is_safe_relative_path(&entry.relative_path) {
                return Err(invalid(format!("unsafe path {}", entry.relative_path)));
            }
            if !seen.insert(entry.relative_path.as_str()) {
                return Err(invalid(format!("duplicate path {}", entry.relative_path)));
            }
            if entry.content_hash.to_hex().len() != self.hash_algorithm.hex_len() {
                return Err(invalid(format!(
                    "hash of {} is not a {} digest",
                    entry.relative_path, self.hash_algorithm
                )));
            }
        }
        for path in &self.removed {
            if !is_safe_relative_path(path) {
                return Err(invalid(format!("unsafe path {}", path)));
            }
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.manifest.iter().map(|e| e.size_bytes).sum()
    }

    pub fn file_count(&self) -> usize {
        self.manifest.len()
    }
}

/// True for non-empty `/`-separated paths with no root, `.` or `..` segments.
pub fn is_safe_relative_path(path: &str) -> bool {
    if cfg!(windows) && (path.contains('\\') || path.contains(':')) {
        return false;
    }
    !path.is_empty()
        && !path.starts_with('/')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
