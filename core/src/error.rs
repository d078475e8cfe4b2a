use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source not found or not a readable directory: {path}")]
    SourceNotFound { path: String },

    #[error("Destination is the source folder: {path}")]
    DestinationIsSource { path: String },

    #[error("Failed to write to destination {path}: {source}")]
    DestinationWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    #[error("Snapshot {id} is incomplete (no manifest)")]
    IncompleteSnapshot { id: String },

    #[error("Snapshot chain broken at {id}: {reason}")]
    ChainBroken { id: String, reason: String },

    #[error("Content hash mismatch for {path} in snapshot {id}")]
    HashMismatch { id: String, path: String },

    #[error("Invalid manifest in {id}: {reason}")]
    InvalidManifest { id: String, reason: String },

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn destination_write(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::DestinationWrite {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
