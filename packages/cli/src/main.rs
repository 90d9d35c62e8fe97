#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for b2-mirror.
//!
//! ```text
//! b2_mirror [--config PATH] [--verbose] sync [--dry-run]
//! b2_mirror [--config PATH] [--verbose] clean [--force] [--dry-run]
//! b2_mirror [--config PATH] init-config
//! ```
//!
//! Running with no subcommand performs a `sync`.
//!
//! Uses `indicatif-log-bridge` (via [`b2_mirror_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use b2_mirror_b2::{B2Cli, StorageTool};
use b2_mirror_cli_utils::{IndicatifProgress, MultiProgress, TerminalConfirmer};
use b2_mirror_config::MirrorConfig;
use b2_mirror_models::CleanState;
use b2_mirror_sync::{
    CleanError, CleanOptions, CleanOrchestrator, SyncOptions, SyncOrchestrator,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "b2_mirror",
    about = "Sync a local tree to Backblaze B2 and mirror it as link files"
)]
struct Cli {
    /// Config file (defaults to `$B2_MIRROR_CONFIG` or
    /// USER-FILES/01.CONFIG/b2_sync_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the input tree and write link files for every object
    Sync {
        /// Preview the sync without uploading or writing link files
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every object in the bucket and cancel unfinished uploads
    Clean {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let multi = b2_mirror_cli_utils::init_logger(cli.verbose);
    let command = cli.command.unwrap_or(Commands::Sync { dry_run: false });

    match command {
        Commands::InitConfig => init_config(cli.config.as_deref()),
        Commands::Sync { dry_run } => {
            let config = MirrorConfig::load(cli.config.as_deref())?;
            let tool = tool_for(&config);
            run_sync(&tool, config, &multi, dry_run).await
        }
        Commands::Clean { force, dry_run } => {
            let config = MirrorConfig::load(cli.config.as_deref())?;
            let tool = tool_for(&config);
            run_clean(&tool, &config, multi, CleanOptions { force, dry_run }).await
        }
    }
}

fn tool_for(config: &MirrorConfig) -> B2Cli {
    B2Cli::new(config.b2.binary.clone(), config.list_timeout())
}

fn init_config(path: Option<&Path>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let path = b2_mirror_config::resolve_path(path, |name| std::env::var(name).ok());
    MirrorConfig::write_default(&path)?;
    println!("Created config file: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn run_sync(
    tool: &B2Cli,
    config: MirrorConfig,
    multi: &MultiProgress,
    dry_run: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = with_discovered_download_url(tool, config).await;
    let progress = IndicatifProgress::batch_bar(multi, "Writing link files");

    let report = SyncOrchestrator::new(tool, &config)
        .with_progress(progress)
        .run(SyncOptions { dry_run })
        .await?;

    if report.is_clean() {
        println!(
            "Sync complete: {} link file(s) in {}",
            report.link_files_written,
            report
                .metadata
                .output_dir
                .as_deref()
                .map_or_else(String::new, |p| p.display().to_string())
        );
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "Sync finished with errors (tool: {}, {} item error(s)); see the run directory for details",
            report.statistics.exit_status,
            report.errors.len()
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Fills in the account's download host when the config leaves it unset.
async fn with_discovered_download_url(tool: &B2Cli, config: MirrorConfig) -> MirrorConfig {
    if config.b2.download_url.is_some() {
        return config;
    }

    match tool.download_base_url().await {
        Ok(url) => {
            log::info!("Using account download URL {url}");
            config.with_download_url(url)
        }
        Err(e) => {
            log::warn!(
                "Could not read the account download URL ({e}), using {}",
                config.download_url()
            );
            config
        }
    }
}

async fn run_clean(
    tool: &B2Cli,
    config: &MirrorConfig,
    multi: MultiProgress,
    options: CleanOptions,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::batch_bar(&multi, "Deleting objects");
    let confirmer = TerminalConfirmer::new(multi);

    let mut clean = CleanOrchestrator::new(tool, config, &confirmer).with_progress(progress);
    let report = match clean.run(options).await {
        Ok(report) => report,
        Err(e @ CleanError::Access { .. }) => {
            log::error!("{e}");
            eprintln!("Clean aborted: {e}");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    match report.final_state {
        CleanState::Aborted => {
            println!("Clean aborted; nothing was deleted");
            Ok(ExitCode::SUCCESS)
        }
        _ if report.errors.is_empty() => {
            println!(
                "Clean complete: {} object(s) deleted, {} unfinished upload(s) cancelled",
                report.deleted, report.cancelled_uploads
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            eprintln!(
                "Clean finished with {} error(s); {}/{} object(s) deleted",
                report.errors.len(),
                report.deleted,
                report.targets
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
