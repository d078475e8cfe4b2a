use crate::hasher::hash_reader;
use crate::{ContentHash, Repository, Result, SnapshotId};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Ok,
    Missing,
    Mismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    Unreadable {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub relative_path: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub snapshot_id: SnapshotId,
    pub files: Vec<FileCheck>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Ok)
    }

    pub fn verified_count(&self) -> usize {
        self.files.iter().filter(|f| f.status == FileStatus::Ok).count()
    }

    /// Relative paths of every file that did not verify.
    pub fn failed_paths(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.status != FileStatus::Ok)
            .map(|f| f.relative_path.as_str())
            .collect()
    }

    pub fn missing(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Missing)
            .map(|f| f.relative_path.as_str())
            .collect()
    }

    pub fn mismatched(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Mismatch { .. }))
            .map(|f| f.relative_path.as_str())
            .collect()
    }
}

/// Re-hashes every file stored in the snapshot and compares it to its manifest entry.
///
/// Read-only. Only the snapshot's own manifest is checked; files inherited from base
/// snapshots are verified by verifying those snapshots.
pub async fn verify_snapshot(repo: &Repository, id: &SnapshotId) -> Result<VerifyReport> {
    let snapshot = repo.load_snapshot(id).await?;
    info!(snapshot = %id, files = snapshot.manifest.len(), "Verifying snapshot");

    let mut files = Vec::with_capacity(snapshot.manifest.len());
    for entry in &snapshot.manifest {
        let status = if !repo.has_file(id, &entry.relative_path).await? {
            FileStatus::Missing
        } else {
            let hashed = match repo.file_reader(id, &entry.relative_path).await {
                Ok(mut reader) => hash_reader(snapshot.hash_algorithm, &mut reader)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match hashed {
                Ok((actual, _)) => {
                    if actual == entry.content_hash {
                        FileStatus::Ok
                    } else {
                        FileStatus::Mismatch {
                            expected: entry.content_hash.clone(),
                            actual,
                        }
                    }
                }
                Err(reason) => FileStatus::Unreadable { reason },
            }
        };

        match &status {
            FileStatus::Ok => debug!(path = %entry.relative_path, "Verified"),
            other => warn!(path = %entry.relative_path, status = ?other, "Verification failed"),
        }

        files.push(FileCheck {
            relative_path: entry.relative_path.clone(),
            status,
        });
    }

    let report = VerifyReport {
        snapshot_id: id.clone(),
        files,
    };
    info!(
        snapshot = %id,
        verified = report.verified_count(),
        failed = report.failed_paths().len(),
        "Verification finished"
    );
    Ok(report)
}
