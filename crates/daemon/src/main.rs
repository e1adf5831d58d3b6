/// Dark Messenger daemon
///
/// Runs Tor with a hidden service and answers the peer protocol on it:
/// - Stages and supervises the bundled Tor binary
/// - Starts the protocol server once Tor has bootstrapped
/// - Keeps contacts and received messages on disk

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use darkmsg_common::{Settings, SupervisorConfig};
use darkmsg_core::tor::{self, torrc, TorrcParams};
use darkmsg_core::{JsonSettingsStore, SettingsStore, TorSupervisor};
use darkmsg_daemon::{logging, AppHost, HiddenServiceServer, HostWorker};

/// Dark Messenger - peer-to-peer messaging over Tor hidden services
#[derive(Parser)]
#[command(name = "darkmsg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; written with defaults when missing
    #[arg(short, long, default_value = "darkmsg.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run Tor and the hidden service until Ctrl-C (default)
    Run,

    /// Print the torrc that would be generated
    Torrc,

    /// Print the Tor binary variant selected for this machine
    Abi,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Torrc => {
            let params = TorrcParams::from_config(&config)?;
            print!("{}", torrc::render(&params));
            Ok(())
        }
        Commands::Abi => {
            let reported = tor::reported_abi(config.abi.as_deref());
            println!("{} -> {}", reported, tor::select_variant(&reported));
            Ok(())
        }
    }
}

/// Load configuration, saving the defaults for next time when there is none
fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        return SupervisorConfig::from_file(path)
            .with_context(|| format!("invalid configuration {}", path.display()));
    }

    info!("No configuration file found, using defaults");
    let config = SupervisorConfig::default();
    if let Err(e) = config.to_file(path) {
        warn!("Failed to save default config: {}", e);
    } else {
        info!("Saved default configuration to {:?}", path);
    }
    Ok(config)
}

/// Tor auto-start flag, seeding the bundled settings on first run
fn tor_enabled(store: &JsonSettingsStore) -> Result<bool> {
    match store.load()? {
        Some(settings) => Ok(settings.tor_enabled()),
        None => {
            let settings = Settings::bundled();
            store.save(&settings.to_json_value()?)?;
            info!("Saved default settings to {:?}", store.path());
            Ok(settings.tor_enabled())
        }
    }
}

async fn run(config: SupervisorConfig) -> Result<()> {
    info!("Starting Dark Messenger daemon v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.app_dir)
        .with_context(|| format!("failed to create {}", config.app_dir.display()))?;

    let settings = Arc::new(JsonSettingsStore::new(config.settings_path()));
    let enabled = tor_enabled(&settings)?;

    let (host, events) = AppHost::new();
    let host = Arc::new(host);
    let worker = HostWorker::new(&config.app_dir, settings.clone())?;
    let host_task = tokio::spawn(worker.run(events));

    let server = Arc::new(HiddenServiceServer::new(
        config.hidden_service_port,
        settings.clone(),
        host.clone(),
    ));
    let supervisor = TorSupervisor::new(config, host.clone(), settings, server.clone());

    if enabled {
        if supervisor.start().await {
            info!("Tor started. Press Ctrl+C to stop.");
        } else {
            warn!("Tor failed to start, see the log above. Press Ctrl+C to exit.");
        }
    } else {
        info!("Tor is disabled in settings. Press Ctrl+C to exit.");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let status = supervisor.status().await;
    supervisor.stop().await;
    info!(
        lifecycle = %status.lifecycle,
        onion_address = status.onion_address.as_deref().unwrap_or("-"),
        "Tor stopped"
    );

    drop(supervisor);
    drop(server);
    drop(host);
    if tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .is_err()
    {
        warn!("Host task did not finish in time");
    }

    Ok(())
}
