use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

pub type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxAsyncWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Storage for snapshot data, addressed by `/`-separated keys relative to the backend root.
///
/// Write-side failures are reported as [`crate::Error::DestinationWrite`] so callers can
/// treat them as fatal to a run.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read(&self, path: &str) -> Result<Bytes>;

    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Opens `path` for streaming reads.
    async fn reader(&self, path: &str) -> Result<BoxAsyncRead>;

    /// Creates or truncates `path` for streaming writes, creating parent directories.
    async fn writer(&self, path: &str) -> Result<BoxAsyncWrite>;

    async fn create_dir(&self, path: &str) -> Result<()>;

    /// Atomically replaces `to` with `from`.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Lists the immediate children of `prefix` ("" for the root).
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    async fn set_modified(&self, path: &str, time: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

/// Joins backend keys, skipping empty segments.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
