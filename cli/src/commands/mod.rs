pub mod backup;
pub mod restore;
pub mod snapshots;
pub mod verify;

use crate::config::Config;
use anyhow::{Result, anyhow};
use hashback_core::{Repository, SnapshotId};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

pub fn open_repository(cli: &crate::Cli, config: &Config) -> Result<Repository> {
    let destination = cli
        .destination
        .as_ref()
        .or(config.destination.as_ref())
        .ok_or_else(|| {
            anyhow!("Destination required (--destination, HASHBACK_DESTINATION or config file)")
        })?;

    info!("Using destination: {}", destination.display());
    Ok(Repository::open_local(destination))
}

/// Resolves a user-supplied snapshot reference (`latest`, bare id, or folder name).
pub async fn resolve_snapshot(repo: &Repository, query: &str) -> Result<SnapshotId> {
    let history = repo.scan_history().await?;
    Ok(history.find(query)?.snapshot_id.clone())
}

pub fn spinner(cli: &crate::Cli, message: impl Into<String>) -> Result<ProgressBar> {
    if cli.quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} TB", size)
}
