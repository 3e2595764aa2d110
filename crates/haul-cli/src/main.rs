//! # haul CLI
//!
//! Incremental retrieval of a remote tree into a local directory, once or
//! on a schedule.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use haul_config::{init_logging, Config, RemoteConfig};
use haul_engine::{RetrievalCoordinator, RetrievalOptions, RunOutcome, RunReport};
use haul_remote::{MountedFs, RemoteFs};
use haul_store::{CompletionRecord, DedupStore};
use indicatif::HumanBytes;

mod daemon;

/// Haul: pull new files from a remote tree, each exactly once
#[derive(Parser)]
#[command(name = "haul")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.haul/config.toml, then ./haul.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one retrieval pass and wait for it to finish
    Run,

    /// Run retrieval passes on the configured schedule until Ctrl-C
    Daemon,

    /// Show completion records
    Status {
        /// List every record
        #[arg(short, long)]
        list: bool,
    },

    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(config.log.level);
    config.validate().context("Invalid configuration")?;

    let store = DedupStore::open(&config.store.path).with_context(|| {
        format!(
            "Failed to open completion store at {}",
            config.store.path.display()
        )
    })?;

    match cli.command {
        Commands::Status { list } => cmd_status(&store, list),
        Commands::Run => {
            let coordinator = Arc::new(build_coordinator(&config, store).await?);
            cmd_run(coordinator).await
        }
        Commands::Daemon => {
            let coordinator = Arc::new(build_coordinator(&config, store).await?);
            let cadence = config.schedule.cadence()?;
            daemon::run_scheduled(coordinator, cadence).await
        }
        Commands::Config => Ok(()),
    }
}

async fn build_coordinator(config: &Config, store: DedupStore) -> Result<RetrievalCoordinator> {
    let remote = connect_remote(&config.remote).await?;
    Ok(RetrievalCoordinator::new(
        remote,
        store,
        RetrievalOptions::from_config(config),
    ))
}

async fn connect_remote(remote: &RemoteConfig) -> Result<Arc<dyn RemoteFs>> {
    if remote.uses_sftp() {
        return connect_sftp(remote).await;
    }
    let mounted = MountedFs::new(&remote.mount).context("Remote is unreachable")?;
    Ok(Arc::new(mounted))
}

#[cfg(feature = "sftp")]
async fn connect_sftp(remote: &RemoteConfig) -> Result<Arc<dyn RemoteFs>> {
    let settings = sftp_settings(remote)?;
    let sftp = haul_remote::SftpFs::connect(&settings)
        .await
        .context("Remote is unreachable")?;
    Ok(Arc::new(sftp))
}

#[cfg(not(feature = "sftp"))]
async fn connect_sftp(remote: &RemoteConfig) -> Result<Arc<dyn RemoteFs>> {
    bail!(
        "remote.host = {:?} needs haul built with the `sftp` feature; \
         alternatively mount the remote and set remote.mount",
        remote.host
    )
}

/// A private key wins over a password; the password then unlocks the key.
#[cfg(feature = "sftp")]
fn sftp_settings(remote: &RemoteConfig) -> Result<haul_remote::SftpSettings> {
    use haul_remote::{SftpAuth, SftpSettings};

    let auth = match (&remote.private_key, &remote.password) {
        (Some(path), passphrase) => SftpAuth::Key {
            path: path.clone(),
            passphrase: passphrase.clone(),
        },
        (None, Some(password)) => SftpAuth::Password(password.clone()),
        (None, None) => bail!("SFTP needs remote.password or remote.private_key"),
    };
    Ok(SftpSettings {
        host: remote.host.trim().to_string(),
        port: remote.port,
        username: remote.username.clone(),
        auth,
        insecure_known_hosts: remote.insecure_known_hosts,
    })
}

async fn cmd_run(coordinator: Arc<RetrievalCoordinator>) -> Result<()> {
    let outcome = tokio::task::spawn_blocking(move || coordinator.run()).await??;

    let report = match outcome {
        RunOutcome::Dispatched(handle) => tokio::task::spawn_blocking(move || handle.join()).await?,
        RunOutcome::Skipped => {
            println!("Another run is still active; nothing dispatched");
            return Ok(());
        }
    };

    print_report(&report);
    if !report.is_clean() {
        bail!(
            "{} entries failed and will be retried on the next run",
            report.failed.len()
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Retrieved {} entries ({}), {} already present",
        report.completed,
        HumanBytes(report.bytes),
        report.skipped
    );
    for (name, error) in &report.failed {
        println!("  failed: {}: {}", name, error);
    }
}

fn cmd_status(store: &DedupStore, list: bool) -> Result<()> {
    let records = store.records()?;
    println!("{} completion records", records.len());

    if list {
        for (_, record) in &records {
            println!("{}", format_record(record));
        }
    }
    Ok(())
}

fn format_record(record: &CompletionRecord) -> String {
    let when = i64::try_from(record.completed_at)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let kind = if record.is_dir { "dir" } else { "file" };
    format!(
        "{}  {:<4}  {:>10}  {}",
        when,
        kind,
        HumanBytes(record.bytes).to_string(),
        record.path
    )
}
