use super::{open_repository, resolve_snapshot, spinner};
use crate::config::Config;
use anyhow::{Result, bail};
use clap::Args;
use hashback_core::{FileStatus, verify_snapshot};

#[derive(Args)]
pub struct VerifyCommand {
    #[arg(help = "Snapshot ID to verify (or 'latest')")]
    snapshot_id: String,

    #[arg(long, help = "Output format (text, json)", default_value = "text")]
    format: String,
}

impl VerifyCommand {
    pub async fn run(&self, cli: &crate::Cli, config: &Config) -> Result<()> {
        let repo = open_repository(cli, config)?;
        let id = resolve_snapshot(&repo, &self.snapshot_id).await?;

        let pb = spinner(cli, format!("Verifying {}...", id))?;
        let result = verify_snapshot(&repo, &id).await;
        pb.finish_and_clear();
        let report = result?;

        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&report)?),
            "text" => {
                println!("Verifying: {}", id);
                for check in &report.files {
                    match &check.status {
                        FileStatus::Ok => {}
                        FileStatus::Missing => println!("  MISSING   {}", check.relative_path),
                        FileStatus::Mismatch { expected, actual } => println!(
                            "  MISMATCH  {} (expected {}, found {})",
                            check.relative_path,
                            expected.short_string(),
                            actual.short_string()
                        ),
                        FileStatus::Unreadable { reason } => {
                            println!("  UNREADABLE {} ({})", check.relative_path, reason)
                        }
                    }
                }
                println!("Verified:  {} files", report.verified_count());
                println!("Failed:    {} files", report.failed_paths().len());
            }
            other => bail!("Unsupported format: {}", other),
        }

        if !report.passed() {
            bail!(
                "Verification of snapshot {} failed for {} file(s)",
                id,
                report.failed_paths().len()
            );
        }
        Ok(())
    }
}
