use crate::hasher::{CopyError, copy_hashed, hash_reader};
use crate::history::FileSet;
use crate::scanner::{SourceFile, build_excludes, scan_source};
use crate::snapshot::{FileError, ManifestEntry, RunSummary};
use crate::{
    ContentHash, Error, HashAlgorithm, Repository, Result, Snapshot, SnapshotId, SnapshotKind,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub mode: SnapshotKind,
    pub excludes: Vec<String>,
    pub hash_algorithm: HashAlgorithm,
    /// Plan the run and report counts without touching the destination.
    pub dry_run: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            mode: SnapshotKind::Incremental,
            excludes: Vec::new(),
            hash_algorithm: HashAlgorithm::default(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub snapshot_id: SnapshotId,
    pub kind: SnapshotKind,
    pub base_snapshot_id: Option<SnapshotId>,
    pub source_root: PathBuf,
    pub dry_run: bool,
    pub summary: RunSummary,
    pub removed: Vec<String>,
}

impl BackupReport {
    pub fn has_errors(&self) -> bool {
        !self.summary.errors.is_empty()
    }
}

async fn open_source(source_root: &Path) -> Result<PathBuf> {
    let not_found = || Error::SourceNotFound {
        path: source_root.display().to_string(),
    };

    let root = fs::canonicalize(source_root).await.map_err(|_| not_found())?;
    let metadata = fs::metadata(&root).await.map_err(|_| not_found())?;
    if !metadata.is_dir() {
        return Err(not_found());
    }
    fs::read_dir(&root).await.map_err(|_| not_found())?;
    Ok(root)
}

/// Destination folders that sit inside the source tree and must not be walked.
async fn destination_skips(repo: &Repository, root: &Path) -> Result<Vec<PathBuf>> {
    let Some(dest) = repo.local_root() else {
        return Ok(Vec::new());
    };
    let Ok(dest) = fs::canonicalize(dest).await else {
        return Ok(Vec::new());
    };
    if dest == root {
        return Err(Error::DestinationIsSource {
            path: dest.display().to_string(),
        });
    }
    if dest.starts_with(root) {
        info!(destination = %dest.display(), "Destination is inside the source, skipping it");
        return Ok(vec![dest]);
    }
    Ok(Vec::new())
}

fn read_error(file: &SourceFile, e: io::Error) -> Error {
    Error::FileRead {
        path: file.relative_path.clone(),
        reason: e.to_string(),
    }
}

async fn hash_source(algorithm: HashAlgorithm, file: &SourceFile) -> Result<(ContentHash, u64)> {
    let mut source = fs::File::open(&file.path)
        .await
        .map_err(|e| read_error(file, e))?;
    hash_reader(algorithm, &mut source)
        .await
        .map_err(|e| read_error(file, e))
}

/// Streams a source file into the snapshot and returns the digest of the bytes stored.
async fn store_source(
    repo: &Repository,
    id: &SnapshotId,
    algorithm: HashAlgorithm,
    file: &SourceFile,
) -> Result<(ContentHash, u64)> {
    let mut source = fs::File::open(&file.path)
        .await
        .map_err(|e| read_error(file, e))?;
    let mut dest = repo.file_writer(id, &file.relative_path).await?;
    copy_hashed(algorithm, &mut source, &mut dest)
        .await
        .map_err(|e| match e {
            CopyError::Read(e) => read_error(file, e),
            CopyError::Write(e) => {
                Error::destination_write(Repository::file_key(id, &file.relative_path), e)
            }
        })
}

fn is_same_or_under(path: &str, dir: &str) -> bool {
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Picks the base for an incremental run: the newest complete snapshot whose chain
/// still resolves.
async fn load_base(repo: &Repository) -> Result<Option<(SnapshotId, FileSet)>> {
    let history = repo.scan_history().await?;

    for candidate in history.snapshots().iter().rev() {
        match history.resolve(&candidate.snapshot_id) {
            Ok(files) => return Ok(Some((candidate.snapshot_id.clone(), files))),
            Err(e @ Error::ChainBroken { .. }) => {
                warn!(
                    snapshot = %candidate.snapshot_id,
                    error = %e,
                    "Snapshot chain is broken, trying an older base"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Backs up `source_root` into a new snapshot under `repo`.
///
/// Per-file read failures are recorded in the returned summary and do not abort the
/// run. Destination write failures abort with [`Error::DestinationWrite`], leaving the
/// snapshot folder without a manifest.
pub async fn run_backup(
    repo: &Repository,
    source_root: &Path,
    options: &BackupOptions,
) -> Result<BackupReport> {
    let root = open_source(source_root).await?;
    let excludes = build_excludes(&root, &options.excludes)?;

    info!(
        source = %root.display(),
        destination = %repo.location(),
        mode = %options.mode,
        dry_run = options.dry_run,
        "Starting backup"
    );

    if !options.dry_run {
        repo.init().await?;
    }
    let skip_dirs = destination_skips(repo, &root).await?;

    let base = match options.mode {
        SnapshotKind::Full => None,
        SnapshotKind::Incremental => load_base(repo).await?,
    };
    let kind = if base.is_some() {
        SnapshotKind::Incremental
    } else {
        SnapshotKind::Full
    };

    let scan = scan_source(&root, &excludes, &skip_dirs)?;

    let mut snapshot_id = SnapshotId::now();
    if !options.dry_run {
        snapshot_id = repo.begin_snapshot(snapshot_id).await?;
    }

    let mut snapshot = Snapshot::new(snapshot_id.clone(), kind, root.clone(), options.hash_algorithm)
        .with_excludes(options.excludes.clone());
    if let Some((base_id, _)) = &base {
        snapshot = snapshot.with_base(base_id.clone());
    }

    let mut summary = RunSummary {
        files_excluded: scan.excluded,
        errors: scan.errors,
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for file in &scan.files {
        summary.files_checked += 1;
        seen.insert(file.relative_path.clone());

        let hashed = hash_source(options.hash_algorithm, file).await;
        let hashed = match hashed {
            Ok((content_hash, size_bytes)) => {
                let unchanged = base.as_ref().is_some_and(|(_, files)| {
                    files.get(&file.relative_path).is_some_and(|prior| {
                        prior.hash_algorithm == options.hash_algorithm
                            && prior.entry.content_hash == content_hash
                    })
                });
                if unchanged {
                    summary.files_skipped += 1;
                    continue;
                }
                if options.dry_run {
                    Ok((content_hash, size_bytes))
                } else {
                    store_source(repo, &snapshot_id, options.hash_algorithm, file).await
                }
            }
            Err(e) => Err(e),
        };

        let (content_hash, size_bytes) = match hashed {
            Ok(stored) => stored,
            Err(Error::FileRead { path, reason }) => {
                warn!(path = %path, reason = %reason, "Skipping unreadable file");
                summary.errors.push(FileError { path, reason });
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!(path = %file.relative_path, hash = %content_hash.short_string(), size = size_bytes, "Copied");

        summary.files_copied += 1;
        summary.bytes_copied += size_bytes;
        snapshot.manifest.push(ManifestEntry {
            relative_path: file.relative_path.clone(),
            content_hash,
            size_bytes,
            modified_time: file.modified,
        });
    }

    if let Some((_, files)) = &base {
        // Unreadable paths still exist in the source, so they must not count as removed.
        let unreadable: Vec<&str> = summary.errors.iter().map(|e| e.path.as_str()).collect();
        snapshot.removed = files
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .filter(|path| !unreadable.iter().any(|u| is_same_or_under(path, u)))
            .cloned()
            .collect();
    }

    snapshot.summary = summary;
    snapshot.completed_at = Utc::now();

    if !options.dry_run {
        repo.commit_snapshot(&snapshot).await?;
    }

    info!(
        snapshot = %snapshot.snapshot_id,
        kind = %snapshot.kind,
        checked = snapshot.summary.files_checked,
        copied = snapshot.summary.files_copied,
        skipped = snapshot.summary.files_skipped,
        bytes = snapshot.summary.bytes_copied,
        removed = snapshot.removed.len(),
        errors = snapshot.summary.errors.len(),
        "Backup finished"
    );

    Ok(BackupReport {
        snapshot_id: snapshot.snapshot_id,
        kind: snapshot.kind,
        base_snapshot_id: snapshot.base_snapshot_id,
        source_root: root,
        dry_run: options.dry_run,
        summary: snapshot.summary,
        removed: snapshot.removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BoxAsyncRead, BoxAsyncWrite, ObjectInfo};
    use crate::hasher::hash_data;
    use crate::history::IncompleteReason;
    use crate::local::LocalBackend;
    use crate::verify::verify_snapshot;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::DateTime;
    use std::fs as stdfs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        source: TempDir,
        dest: TempDir,
        repo: Repository,
    }

    impl Fixture {
        fn new() -> Self {
            let source = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();
            let repo = Repository::open_local(dest.path());
            Self { source, dest, repo }
        }

        fn write(&self, path: &str, contents: &str) {
            let full = self.source.path().join(path);
            stdfs::create_dir_all(full.parent().unwrap()).unwrap();
            stdfs::write(full, contents).unwrap();
        }

        async fn backup(&self, mode: SnapshotKind) -> BackupReport {
            let options = BackupOptions {
                mode,
                ..Default::default()
            };
            run_backup(&self.repo, self.source.path(), &options).await.unwrap()
        }
    }

    fn manifest_paths(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.manifest.iter().map(|e| e.relative_path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_full_then_incremental_copies_only_changes() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("b.txt", "bravo");

        let s1 = fx.backup(SnapshotKind::Full).await;
        assert_eq!(s1.kind, SnapshotKind::Full);
        assert_eq!(s1.summary.files_copied, 2);
        assert_eq!(s1.summary.bytes_copied, 10);

        let full = fx.repo.load_snapshot(&s1.snapshot_id).await.unwrap();
        assert_eq!(manifest_paths(&full), vec!["a.txt", "b.txt"]);
        assert_eq!(
            full.manifest[0].content_hash,
            hash_data(HashAlgorithm::Md5, b"alpha")
        );

        fx.write("a.txt", "alpha v2");
        let s2 = fx.backup(SnapshotKind::Incremental).await;

        assert_eq!(s2.kind, SnapshotKind::Incremental);
        assert_eq!(s2.base_snapshot_id.as_ref(), Some(&s1.snapshot_id));
        assert_eq!(s2.summary.files_copied, 1);
        assert_eq!(s2.summary.files_skipped, 1);
        assert_eq!(s2.summary.bytes_copied, 8);

        let incr = fx.repo.load_snapshot(&s2.snapshot_id).await.unwrap();
        assert_eq!(manifest_paths(&incr), vec!["a.txt"]);
        assert_eq!(
            incr.manifest[0].content_hash,
            hash_data(HashAlgorithm::Md5, b"alpha v2")
        );
        assert!(!fx.dest.path().join(s2.snapshot_id.dir_name()).join("files/b.txt").exists());
    }

    #[tokio::test]
    async fn test_unchanged_files_are_skipped_across_incremental_chain() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("dir/b.txt", "bravo");

        fx.backup(SnapshotKind::Full).await;
        fx.write("c.txt", "charlie");
        let s2 = fx.backup(SnapshotKind::Incremental).await;
        assert_eq!(s2.summary.files_copied, 1);

        let s3 = fx.backup(SnapshotKind::Incremental).await;
        assert_eq!(s3.base_snapshot_id.as_ref(), Some(&s2.snapshot_id));
        assert_eq!(s3.summary.files_copied, 0);
        assert_eq!(s3.summary.files_skipped, 3);
        assert_eq!(s3.summary.bytes_copied, 0);
        let incr = fx.repo.load_snapshot(&s3.snapshot_id).await.unwrap();
        assert!(incr.manifest.is_empty());
    }

    #[tokio::test]
    async fn test_incremental_without_history_runs_full() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");

        let report = fx.backup(SnapshotKind::Incremental).await;

        assert_eq!(report.kind, SnapshotKind::Full);
        assert!(report.base_snapshot_id.is_none());
        assert_eq!(report.summary.files_copied, 1);
    }

    #[tokio::test]
    async fn test_deleted_source_files_are_recorded_as_removed() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("gone/b.txt", "bravo");
        fx.backup(SnapshotKind::Full).await;

        stdfs::remove_dir_all(fx.source.path().join("gone")).unwrap();
        let report = fx.backup(SnapshotKind::Incremental).await;

        assert_eq!(report.removed, vec!["gone/b.txt".to_string()]);
        let snapshot = fx.repo.load_snapshot(&report.snapshot_id).await.unwrap();
        assert_eq!(snapshot.removed, vec!["gone/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_full_mode_ignores_history() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.backup(SnapshotKind::Full).await;

        let report = fx.backup(SnapshotKind::Full).await;

        assert_eq!(report.kind, SnapshotKind::Full);
        assert!(report.base_snapshot_id.is_none());
        assert_eq!(report.summary.files_copied, 1);
        assert_eq!(report.summary.files_skipped, 0);
    }

    #[tokio::test]
    async fn test_excludes_are_applied_and_recorded() {
        let fx = Fixture::new();
        fx.write("keep.txt", "k");
        fx.write("skip.log", "s");
        fx.write("cache/blob", "c");

        let options = BackupOptions {
            mode: SnapshotKind::Full,
            excludes: vec!["*.log".to_string(), "cache/".to_string()],
            ..Default::default()
        };
        let report = run_backup(&fx.repo, fx.source.path(), &options).await.unwrap();

        assert_eq!(report.summary.files_copied, 1);
        assert_eq!(report.summary.files_excluded, 2);
        let snapshot = fx.repo.load_snapshot(&report.snapshot_id).await.unwrap();
        assert_eq!(manifest_paths(&snapshot), vec!["keep.txt"]);
        assert_eq!(snapshot.excludes, options.excludes);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        let repo = Repository::open_local(fx.dest.path().join("never-created"));

        let options = BackupOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run_backup(&repo, fx.source.path(), &options).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.summary.files_copied, 1);
        assert!(!fx.dest.path().join("never-created").exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let fx = Fixture::new();
        let err = run_backup(
            &fx.repo,
            &fx.source.path().join("does-not-exist"),
            &BackupOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));

        fx.write("file.txt", "x");
        let err = run_backup(&fx.repo, &fx.source.path().join("file.txt"), &BackupOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_blocked_destination_is_a_write_error() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        let blocker = fx.dest.path().join("blocker");
        stdfs::write(&blocker, "not a directory").unwrap();
        let repo = Repository::open_local(blocker.join("dest"));

        let err = run_backup(&repo, fx.source.path(), &BackupOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DestinationWrite { .. }));
    }

    #[tokio::test]
    async fn test_hash_algorithm_change_copies_everything() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.backup(SnapshotKind::Full).await;

        let options = BackupOptions {
            hash_algorithm: HashAlgorithm::Blake3,
            ..Default::default()
        };
        let report = run_backup(&fx.repo, fx.source.path(), &options).await.unwrap();

        assert_eq!(report.kind, SnapshotKind::Incremental);
        assert_eq!(report.summary.files_copied, 1);
        let verify = verify_snapshot(&fx.repo, &report.snapshot_id).await.unwrap();
        assert!(verify.passed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        fx.write("ok.txt", "fine");
        fx.write("secret.txt", "hidden");
        let secret = fx.source.path().join("secret.txt");
        stdfs::set_permissions(&secret, stdfs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not stop root.
        if stdfs::read(&secret).is_ok() {
            return;
        }

        let report = fx.backup(SnapshotKind::Full).await;

        assert_eq!(report.summary.files_copied, 1);
        assert_eq!(report.summary.errors.len(), 1);
        assert_eq!(report.summary.errors[0].path, "secret.txt");
        assert!(fx.repo.load_snapshot(&report.snapshot_id).await.is_ok());

        let next = fx.backup(SnapshotKind::Incremental).await;
        assert!(next.removed.is_empty());
    }

    /// Local backend whose writer fails for one stored path.
    struct FailingWriter {
        inner: LocalBackend,
        fail_suffix: &'static str,
    }

    #[async_trait]
    impl Backend for FailingWriter {
        async fn init(&self) -> Result<()> {
            self.inner.init().await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn read(&self, path: &str) -> Result<Bytes> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, data: Bytes) -> Result<()> {
            self.inner.write(path, data).await
        }
        async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
            self.inner.reader(path).await
        }
        async fn writer(&self, path: &str) -> Result<BoxAsyncWrite> {
            if path.ends_with(self.fail_suffix) {
                return Err(Error::destination_write(path, io::Error::other("disk full")));
            }
            self.inner.writer(path).await
        }
        async fn create_dir(&self, path: &str) -> Result<()> {
            self.inner.create_dir(path).await
        }
        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename(from, to).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
            self.inner.list(prefix).await
        }
        async fn set_modified(&self, path: &str, time: DateTime<Utc>) -> Result<()> {
            self.inner.set_modified(path, time).await
        }
    }

    #[tokio::test]
    async fn test_write_failure_mid_run_leaves_incomplete_snapshot() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        fx.write("b.txt", "bravo");
        let repo = Repository::new(
            "failing",
            Arc::new(FailingWriter {
                inner: LocalBackend::new(fx.dest.path()),
                fail_suffix: "files/b.txt",
            }),
        );

        let err = run_backup(&repo, fx.source.path(), &BackupOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DestinationWrite { .. }));

        let history = fx.repo.scan_history().await.unwrap();
        assert!(history.snapshots().is_empty());
        assert_eq!(history.incomplete().len(), 1);
        let partial = &history.incomplete()[0];
        assert_eq!(partial.reason, IncompleteReason::MissingManifest);
        assert!(fx.dest.path().join(&partial.dir_name).join("files/a.txt").is_file());

        let next = fx.backup(SnapshotKind::Incremental).await;
        assert_eq!(next.kind, SnapshotKind::Full);
        assert_eq!(next.summary.files_copied, 2);
    }

    #[tokio::test]
    async fn test_broken_latest_chain_falls_back_to_older_base() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        let s1 = fx.backup(SnapshotKind::Full).await;
        let s2 = fx.backup(SnapshotKind::Full).await;
        fx.write("b.txt", "bravo");
        let s3 = fx.backup(SnapshotKind::Incremental).await;
        assert_eq!(s3.base_snapshot_id.as_ref(), Some(&s2.snapshot_id));

        stdfs::remove_file(fx.dest.path().join(s2.snapshot_id.dir_name()).join("manifest.json"))
            .unwrap();

        let s4 = fx.backup(SnapshotKind::Incremental).await;
        assert_eq!(s4.kind, SnapshotKind::Incremental);
        assert_eq!(s4.base_snapshot_id.as_ref(), Some(&s1.snapshot_id));
        assert_eq!(s4.summary.files_skipped, 1);
        assert_eq!(s4.summary.files_copied, 1);
    }

    #[tokio::test]
    async fn test_destination_inside_source_is_skipped() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        let repo = Repository::open_local(fx.source.path().join("backups"));
        let options = BackupOptions {
            mode: SnapshotKind::Full,
            ..Default::default()
        };

        run_backup(&repo, fx.source.path(), &options).await.unwrap();
        let second = run_backup(&repo, fx.source.path(), &options).await.unwrap();

        assert_eq!(second.summary.files_checked, 1);
        assert_eq!(second.summary.files_excluded, 1);
        let snapshot = repo.load_snapshot(&second.snapshot_id).await.unwrap();
        assert_eq!(manifest_paths(&snapshot), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_destination_equal_to_source_is_rejected() {
        let fx = Fixture::new();
        fx.write("a.txt", "alpha");
        let repo = Repository::open_local(fx.source.path());

        let err = run_backup(&repo, fx.source.path(), &BackupOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DestinationIsSource { .. }));
        assert!(!stdfs::read_dir(fx.source.path())
            .unwrap()
            .any(|e| e.unwrap().file_name().to_string_lossy().starts_with("backup_")));
    }

    #[tokio::test]
    async fn test_stored_copy_matches_source_across_buffer_sizes() {
        let fx = Fixture::new();
        let big: String = (0..200_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        fx.write("big.txt", &big);

        let report = fx.backup(SnapshotKind::Full).await;

        assert_eq!(report.summary.bytes_copied, big.len() as u64);
        let stored = stdfs::read_to_string(
            fx.dest.path().join(report.snapshot_id.dir_name()).join("files/big.txt"),
        )
        .unwrap();
        assert_eq!(stored, big);
        let snapshot = fx.repo.load_snapshot(&report.snapshot_id).await.unwrap();
        assert_eq!(
            snapshot.manifest[0].content_hash,
            hash_data(HashAlgorithm::Md5, big.as_bytes())
        );
    }

    #[test]
    fn test_is_same_or_under() {
        assert!(is_same_or_under("a/b.txt", "a"));
        assert!(is_same_or_under("a", "a"));
        assert!(!is_same_or_under("ab/c", "a"));
    }
}
