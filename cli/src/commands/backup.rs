use super::{format_size, open_repository, spinner};
use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use hashback_core::{BackupOptions, HashAlgorithm, SnapshotKind, run_backup};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
pub struct BackupCommand {
    #[arg(help = "Folder to back up")]
    source: PathBuf,

    #[arg(long, help = "Copy every file instead of only changes since the last snapshot")]
    full: bool,

    #[arg(long, help = "Exclude pattern (gitignore syntax), may be repeated")]
    exclude: Vec<String>,

    #[arg(long, help = "Content hash algorithm (md5, blake3)")]
    hash: Option<HashAlgorithm>,

    #[arg(long, help = "Dry run - report what would be copied without writing")]
    dry_run: bool,

    #[arg(long, help = "Output format (text, json)", default_value = "text")]
    format: String,
}

impl BackupCommand {
    fn options(&self, config: &Config) -> BackupOptions {
        let mut excludes = config.exclude.clone();
        for pattern in &self.exclude {
            if !excludes.contains(pattern) {
                excludes.push(pattern.clone());
            }
        }

        BackupOptions {
            mode: if self.full {
                SnapshotKind::Full
            } else {
                SnapshotKind::Incremental
            },
            excludes,
            hash_algorithm: self.hash.or(config.hash_algorithm).unwrap_or_default(),
            dry_run: self.dry_run,
        }
    }

    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        if !matches!(self.format.as_str(), "text" | "json") {
            return Err(anyhow!("Unsupported format: {}", self.format));
        }

        let repo = open_repository(cli, config)?;
        let options = self.options(config);

        info!("Backing up {}", self.source.display());

        let pb = spinner(cli, format!("Backing up {}...", self.source.display()))?;
        let result = run_backup(&repo, &self.source, &options).await;
        pb.finish_and_clear();
        let report = result?;

        if self.format == "json" {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let summary = &report.summary;
        if report.dry_run {
            println!("DRY RUN - no data was written");
        }
        println!("Backup of:       {}", report.source_root.display());
        println!("Destination:     {}", repo.location());
        match &report.base_snapshot_id {
            Some(base) => println!("Mode:            {} (base {})", report.kind, base),
            None => println!("Mode:            {}", report.kind),
        }
        println!("{:-<50}", "");
        println!("Files checked:   {}", summary.files_checked);
        println!("Files copied:    {}", summary.files_copied);
        println!("Files skipped:   {}", summary.files_skipped);
        if summary.files_excluded > 0 {
            println!("Excluded:        {}", summary.files_excluded);
        }
        if !report.removed.is_empty() {
            println!("Removed:         {}", report.removed.len());
        }
        println!("Total size:      {}", format_size(summary.bytes_copied));
        if report.has_errors() {
            println!("Errors:          {}", summary.errors.len());
            for error in &summary.errors {
                println!("  {}: {}", error.path, error.reason);
            }
            warn!("{} file(s) could not be read and were skipped", summary.errors.len());
        }
        println!("Snapshot:        {}", report.snapshot_id);

        Ok(())
    }
}
