use super::{format_size, open_repository};
use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use hashback_core::{IncompleteReason, IncompleteSnapshot, Snapshot, SnapshotId, SnapshotKind};
use serde::Serialize;

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(long, help = "Show latest N snapshots")]
    latest: Option<usize>,
}

#[derive(Serialize)]
struct SnapshotRow<'a> {
    snapshot_id: &'a SnapshotId,
    kind: SnapshotKind,
    base_snapshot_id: Option<&'a SnapshotId>,
    created_at: String,
    files: usize,
    size_bytes: u64,
    removed: usize,
    errors: usize,
}

impl<'a> From<&'a Snapshot> for SnapshotRow<'a> {
    fn from(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot_id: &snapshot.snapshot_id,
            kind: snapshot.kind,
            base_snapshot_id: snapshot.base_snapshot_id.as_ref(),
            created_at: snapshot.created_at.to_rfc3339(),
            files: snapshot.file_count(),
            size_bytes: snapshot.total_size(),
            removed: snapshot.removed.len(),
            errors: snapshot.summary.errors.len(),
        }
    }
}

#[derive(Serialize)]
struct Listing<'a> {
    snapshots: Vec<SnapshotRow<'a>>,
    incomplete: &'a [IncompleteSnapshot],
}

impl SnapshotsCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo = open_repository(cli, config)?;
        let history = repo.scan_history().await?;
        let format = self.format.as_deref().unwrap_or("table");

        let mut snapshots: &[Snapshot] = history.snapshots();
        if let Some(latest) = self.latest {
            snapshots = &snapshots[snapshots.len().saturating_sub(latest)..];
        }

        match format {
            "table" => {
                if history.is_empty() {
                    println!("No snapshots found");
                    return Ok(());
                }

                println!(
                    "{:<24} {:<12} {:<24} {:>7} {:>12}  {}",
                    "ID", "Kind", "Base", "Files", "Size", "Created"
                );
                println!("{:-<100}", "");

                for snapshot in snapshots {
                    let base = snapshot
                        .base_snapshot_id
                        .as_ref()
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "-".to_string());

                    println!(
                        "{:<24} {:<12} {:<24} {:>7} {:>12}  {}",
                        snapshot.snapshot_id,
                        snapshot.kind,
                        base,
                        snapshot.file_count(),
                        format_size(snapshot.total_size()),
                        snapshot.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }

                if !history.incomplete().is_empty() {
                    println!();
                    println!("Incomplete or corrupt snapshots:");
                    for entry in history.incomplete() {
                        let reason = match &entry.reason {
                            IncompleteReason::MissingManifest => "no manifest".to_string(),
                            IncompleteReason::Corrupt(reason) => format!("corrupt: {}", reason),
                        };
                        println!("  {:<32} {}", entry.dir_name, reason);
                    }
                }
            }
            "json" => {
                let listing = Listing {
                    snapshots: snapshots.iter().map(SnapshotRow::from).collect(),
                    incomplete: history.incomplete(),
                };
                println!("{}", serde_json::to_string_pretty(&listing)?);
            }
            _ => {
                return Err(anyhow!("Unsupported format: {}", format));
            }
        }

        Ok(())
    }
}
