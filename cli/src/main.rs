mod commands;
mod config;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, restore::RestoreCommand, snapshots::SnapshotsCommand,
    verify::VerifyCommand,
};
use config::Config;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "hashback",
    about = "Full and incremental folder backups with hash-based change detection",
    long_about = "Hashback copies a folder into timestamped snapshots, only storing files whose content changed since the previous snapshot, and can list, verify and restore them"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, env = "HASHBACK_DESTINATION", help = "Backup destination root")]
    destination: Option<PathBuf>,

    #[arg(long, global = true, env = "HASHBACK_CONFIG", help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Back up a folder (incremental unless --full)")]
    Backup(BackupCommand),

    #[command(about = "List snapshots in the destination")]
    Snapshots(SnapshotsCommand),

    #[command(about = "Verify the stored files of a snapshot against its manifest")]
    Verify(VerifyCommand),

    #[command(about = "Restore the full file set of a snapshot")]
    Restore(RestoreCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;

    let config = Config::load(cli.config.as_deref())?;
    debug!(?config, "Loaded configuration");

    match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Snapshots(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Verify(ref cmd) => cmd.run(&cli, &config).await,
        Commands::Restore(ref cmd) => cmd.run(&cli, &config).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hashback={level},hashback_core={level}")));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Setting default subscriber failed: {}", e))
}
