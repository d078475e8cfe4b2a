use crate::backend::{Backend, BoxAsyncRead, BoxAsyncWrite, ObjectInfo, join_key};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{BufReader, BufWriter};

/// Backend rooted at a directory on the local filesystem.
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let mut full = self.base_path.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        full
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::destination_write(self.base_path.display().to_string(), e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)).await?)
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.full_path(path);
        let data = fs::read(&full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", path, e)))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::destination_write(parent.display().to_string(), e))?;
        }
        fs::write(&full_path, &data)
            .await
            .map_err(|e| Error::destination_write(full_path.display().to_string(), e))
    }

    async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
        let file = fs::File::open(self.full_path(path))
            .await
            .map_err(|e| Error::Backend(format!("Failed to open {}: {}", path, e)))?;
        Ok(Box::new(BufReader::new(file)))
    }

    async fn writer(&self, path: &str) -> Result<BoxAsyncWrite> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::destination_write(parent.display().to_string(), e))?;
        }
        let file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::destination_write(full_path.display().to_string(), e))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| Error::destination_write(full_path.display().to_string(), e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to_path = self.full_path(to);
        fs::rename(self.full_path(from), &to_path)
            .await
            .map_err(|e| Error::destination_write(to_path.display().to_string(), e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let full_path = self.full_path(prefix);
        let mut results = Vec::new();

        if !fs::try_exists(&full_path).await? || !full_path.is_dir() {
            return Ok(results);
        }

        let mut entries = fs::read_dir(&full_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            results.push(ObjectInfo {
                path: join_key(&[prefix, &name]),
                name,
                size: metadata.len(),
                is_dir: metadata.is_dir(),
                modified,
            });
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    async fn set_modified(&self, path: &str, time: DateTime<Utc>) -> Result<()> {
        let full_path = self.full_path(path);
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&full_path)
            .await
            .map_err(|e| Error::destination_write(full_path.display().to_string(), e))?;
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_modified(time.into()))
            .await
            .map_err(|e| Error::Other(format!("set_modified task failed: {}", e)))?
            .map_err(|e| Error::destination_write(full_path.display().to_string(), e))
    }
}
