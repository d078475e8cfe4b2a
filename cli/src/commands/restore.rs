use super::{format_size, open_repository, resolve_snapshot, spinner};
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use hashback_core::restore_snapshot;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Snapshot ID to restore from (or 'latest')")]
    snapshot_id: String,

    #[arg(help = "Target directory for restore")]
    target: PathBuf,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo = open_repository(cli, config)?;
        let id = resolve_snapshot(&repo, &self.snapshot_id).await?;

        info!("Restoring snapshot {} into {}", id, self.target.display());

        let pb = spinner(cli, format!("Restoring {}...", id))?;
        let result = restore_snapshot(&repo, &id, &self.target).await;
        pb.finish_and_clear();
        let report = result?;

        println!("Restored snapshot: {}", report.snapshot_id);
        if report.chain.len() > 1 {
            let bases: Vec<String> = report.chain[1..].iter().map(|s| s.to_string()).collect();
            println!("Base chain:        {}", bases.join(" <- "));
        }
        println!("Files restored:    {}", report.files_restored);
        println!("Total size:        {}", format_size(report.bytes_restored));
        println!("Location:          {}", report.target.display());

        Ok(())
    }
}
