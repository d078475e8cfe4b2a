use crate::backend::Backend;
use crate::hasher::{CopyError, copy_hashed, hash_reader};
use crate::local::LocalBackend;
use crate::{Error, Repository, Result, SnapshotId};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: SnapshotId,
    /// The snapshot and its bases, newest first.
    pub chain: Vec<SnapshotId>,
    pub target: PathBuf,
    pub files_restored: u64,
    pub bytes_restored: u64,
}

/// Restores the full file set of `id` into `target_root`, creating it if needed.
pub async fn restore_snapshot(
    repo: &Repository,
    id: &SnapshotId,
    target_root: &Path,
) -> Result<RestoreReport> {
    let target = LocalBackend::new(target_root);
    let mut report = restore_snapshot_to(repo, id, &target).await?;
    report.target = target_root.to_path_buf();
    Ok(report)
}

/// Restores the full file set of `id` into `target`.
///
/// The base chain and every stored file it references are checked before anything is
/// written, so a broken chain leaves the target untouched.
pub async fn restore_snapshot_to(
    repo: &Repository,
    id: &SnapshotId,
    target: &dyn Backend,
) -> Result<RestoreReport> {
    let history = repo.scan_history().await?;
    let chain: Vec<SnapshotId> = history
        .chain(id)?
        .into_iter()
        .map(|s| s.snapshot_id.clone())
        .collect();
    let files = history.resolve(id)?;

    info!(
        snapshot = %id,
        chain_length = chain.len(),
        files = files.len(),
        "Restoring snapshot"
    );

    for (path, file) in &files {
        if !repo.has_file(&file.stored_in, path).await? {
            return Err(Error::ChainBroken {
                id: file.stored_in.to_string(),
                reason: format!("stored file {} is missing", path),
            });
        }
    }

    target.init().await?;

    let mut report = RestoreReport {
        snapshot_id: id.clone(),
        chain,
        target: PathBuf::new(),
        files_restored: 0,
        bytes_restored: 0,
    };

    for (path, file) in &files {
        let mismatch = || {
            warn!(path = %path, snapshot = %file.stored_in, "Stored file does not match its hash");
            Error::HashMismatch {
                id: file.stored_in.to_string(),
                path: path.clone(),
            }
        };
        let stored_error =
            |e: std::io::Error| Error::Backend(format!("Failed to read stored {}: {}", path, e));

        let mut stored = repo.file_reader(&file.stored_in, path).await?;
        let (hash, _) = hash_reader(file.hash_algorithm, &mut stored)
            .await
            .map_err(stored_error)?;
        if hash != file.entry.content_hash {
            return Err(mismatch());
        }

        let mut stored = repo.file_reader(&file.stored_in, path).await?;
        let mut out = target.writer(path).await?;
        let (hash, size) = copy_hashed(file.hash_algorithm, &mut stored, &mut out)
            .await
            .map_err(|e| match e {
                CopyError::Read(e) => stored_error(e),
                CopyError::Write(e) => Error::destination_write(path.as_str(), e),
            })?;
        if hash != file.entry.content_hash {
            return Err(mismatch());
        }

        target.set_modified(path, file.entry.modified_time).await?;
        debug!(path = %path, from = %file.stored_in, size, "Restored");

        report.files_restored += 1;
        report.bytes_restored += size;
    }

    info!(
        snapshot = %id,
        files = report.files_restored,
        bytes = report.bytes_restored,
        "Restore finished"
    );
    Ok(report)
}
