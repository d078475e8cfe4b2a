use crate::backend::{Backend, BoxAsyncRead, BoxAsyncWrite, join_key};
use crate::history::{IncompleteReason, IncompleteSnapshot, SnapshotHistory};
use crate::local::LocalBackend;
use crate::types::SNAPSHOT_DIR_PREFIX;
use crate::{Error, Result, Snapshot, SnapshotId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";
pub const FILES_DIR: &str = "files";

/// A backup destination root holding one folder per snapshot.
///
/// # Layout
///
/// ```text
/// destination/
/// └── backup_<snapshot_id>/
///     ├── manifest.json   # written last; absent while the run is in progress
///     └── files/          # stored files at their source-relative paths
/// ```
///
/// Nothing is cached between calls: [`Repository::scan_history`] rebuilds the
/// history from the folder structure every time it is called.
///
/// # Examples
///
/// ```no_run
/// use hashback_core::Repository;
///
/// #[tokio::main]
/// async fn main() -> hashback_core::Result<()> {
///     let repo = Repository::open_local("/mnt/backups");
///     let history = repo.scan_history().await?;
///     for snapshot in history.snapshots() {
///         println!("{} {} files", snapshot.snapshot_id, snapshot.file_count());
///     }
///     Ok(())
/// }
/// ```
pub struct Repository {
    location: String,
    local_root: Option<PathBuf>,
    backend: Arc<dyn Backend>,
}

impl Repository {
    pub fn new(location: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            location: location.into(),
            local_root: None,
            backend,
        }
    }

    pub fn open_local<P: AsRef<Path>>(path: P) -> Self {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut repo = Self::new(path.display().to_string(), Arc::new(LocalBackend::new(&path)));
        repo.local_root = Some(path);
        repo
    }

    /// Human-readable location of the destination root.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Filesystem root of the destination, when it lives on the local filesystem.
    pub fn local_root(&self) -> Option<&Path> {
        self.local_root.as_deref()
    }

    /// Creates the destination root if it does not exist.
    pub async fn init(&self) -> Result<()> {
        self.backend.init().await
    }

    pub(crate) fn file_key(id: &SnapshotId, relative_path: &str) -> String {
        join_key(&[&id.dir_name(), FILES_DIR, relative_path])
    }

    fn manifest_key(id: &SnapshotId) -> String {
        join_key(&[&id.dir_name(), MANIFEST_FILE])
    }

    /// Reserves a fresh snapshot folder, bumping the id while the folder is taken.
    pub async fn begin_snapshot(&self, mut id: SnapshotId) -> Result<SnapshotId> {
        while self.backend.exists(&id.dir_name()).await? {
            debug!(snapshot = %id, "Snapshot folder exists, bumping id");
            id = id.next();
        }
        self.backend
            .create_dir(&join_key(&[&id.dir_name(), FILES_DIR]))
            .await?;
        Ok(id)
    }

    /// Opens the stored copy of `relative_path` in snapshot `id` for writing.
    pub async fn file_writer(&self, id: &SnapshotId, relative_path: &str) -> Result<BoxAsyncWrite> {
        self.backend.writer(&Self::file_key(id, relative_path)).await
    }

    pub async fn file_reader(&self, id: &SnapshotId, relative_path: &str) -> Result<BoxAsyncRead> {
        self.backend.reader(&Self::file_key(id, relative_path)).await
    }

    pub async fn has_file(&self, id: &SnapshotId, relative_path: &str) -> Result<bool> {
        self.backend.exists(&Self::file_key(id, relative_path)).await
    }

    /// Writes the manifest beside the stored files, marking the snapshot complete.
    pub async fn commit_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let data = snapshot.serialize()?;
        let dir = snapshot.snapshot_id.dir_name();
        let tmp_key = join_key(&[&dir, MANIFEST_TMP_FILE]);
        self.backend.write(&tmp_key, data).await?;
        self.backend
            .rename(&tmp_key, &Self::manifest_key(&snapshot.snapshot_id))
            .await
    }

    pub async fn load_snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        if !self.backend.exists(&id.dir_name()).await? {
            return Err(Error::SnapshotNotFound { id: id.to_string() });
        }
        let manifest_key = Self::manifest_key(id);
        if !self.backend.exists(&manifest_key).await? {
            return Err(Error::IncompleteSnapshot { id: id.to_string() });
        }
        let data = self
            .backend
            .read(&manifest_key)
            .await
            .map_err(|e| Error::InvalidManifest {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        let snapshot = Snapshot::deserialize(&data).map_err(|e| Error::InvalidManifest {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        if &snapshot.snapshot_id != id {
            return Err(Error::InvalidManifest {
                id: id.to_string(),
                reason: format!("manifest belongs to snapshot {}", snapshot.snapshot_id),
            });
        }
        Ok(snapshot)
    }

    /// Scans the destination root and classifies every `backup_*` folder.
    pub async fn scan_history(&self) -> Result<SnapshotHistory> {
        let mut snapshots = Vec::new();
        let mut incomplete = Vec::new();

        for object in self.backend.list("").await? {
            if !object.is_dir || !object.name.starts_with(SNAPSHOT_DIR_PREFIX) {
                continue;
            }

            let Some(id) = SnapshotId::parse(&object.name) else {
                warn!(folder = %object.name, "Snapshot folder has an unparseable id");
                incomplete.push(IncompleteSnapshot {
                    dir_name: object.name,
                    snapshot_id: None,
                    reason: IncompleteReason::Corrupt("folder name is not a snapshot id".to_string()),
                });
                continue;
            };

            match self.load_snapshot(&id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(Error::IncompleteSnapshot { .. }) => {
                    warn!(snapshot = %id, "Snapshot has no manifest, treating as incomplete");
                    incomplete.push(IncompleteSnapshot {
                        dir_name: object.name,
                        snapshot_id: Some(id),
                        reason: IncompleteReason::MissingManifest,
                    });
                }
                Err(Error::InvalidManifest { reason, .. }) => {
                    warn!(snapshot = %id, reason = %reason, "Snapshot manifest is corrupt");
                    incomplete.push(IncompleteSnapshot {
                        dir_name: object.name,
                        snapshot_id: Some(id),
                        reason: IncompleteReason::Corrupt(reason),
                    });
                }
                Err(e) => {
                    warn!(snapshot = %id, error = %e, "Snapshot folder could not be loaded");
                    incomplete.push(IncompleteSnapshot {
                        dir_name: object.name,
                        snapshot_id: Some(id),
                        reason: IncompleteReason::Corrupt(e.to_string()),
                    });
                }
            }
        }

        debug!(
            complete = snapshots.len(),
            incomplete = incomplete.len(),
            "Scanned backup history"
        );
        Ok(SnapshotHistory::new(snapshots, incomplete))
    }
}
