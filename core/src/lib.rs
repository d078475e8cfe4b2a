pub mod backend;
pub mod backup;
pub mod error;
pub mod hasher;
pub mod history;
pub mod local;
pub mod repository;
pub mod restore;
pub mod scanner;
pub mod snapshot;
pub mod types;
pub mod verify;

pub use backend::{Backend, BoxAsyncRead, BoxAsyncWrite, ObjectInfo};
pub use backup::{BackupOptions, BackupReport, run_backup};
pub use error::{Error, Result};
pub use history::{IncompleteReason, IncompleteSnapshot, SnapshotHistory};
pub use local::LocalBackend;
pub use repository::Repository;
pub use restore::{RestoreReport, restore_snapshot};
pub use snapshot::{ManifestEntry, Snapshot};
pub use types::*;
pub use verify::{FileStatus, VerifyReport, verify_snapshot};
