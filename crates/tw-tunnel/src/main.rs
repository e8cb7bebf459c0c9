//! Tunnelwright Tunnel Daemon
//!
//! Connects a WireGuard profile through `wg-quick`, logs the published tunnel
//! state and disconnects on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tw_core::config::{self, TunnelConfig};
use tw_core::profile::Profile;
use tw_core::traits::{KeyValueStore, MemoryStore};
use tw_tunnel::{TunnelOrchestrator, WgQuickEngine};

#[derive(Parser)]
#[command(name = "tw-tunneld")]
#[command(about = "Tunnelwright tunnel daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the profile to connect (TOML)
    #[arg(short, long)]
    profile: PathBuf,

    /// Connect even if the profile requires interactive login
    #[arg(long)]
    force: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tunnelwright daemon starting...");

    // Load configuration
    let config: TunnelConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                TunnelConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            TunnelConfig::default()
        }
    };

    config.validate().context("Invalid configuration")?;

    let profile: Profile = config::load_config(&args.profile)
        .with_context(|| format!("Failed to load profile from {:?}", args.profile))?;
    tracing::info!("Loaded profile {} ({})", profile.name, profile.id);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let engine = Arc::new(WgQuickEngine::new(&config.engine, config.event_buffer));
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let orchestrator = TunnelOrchestrator::new(engine, config).with_store(store);

    // Log every published state
    let mut profiles = orchestrator.subscribe_active_profiles();
    let log_cancel = CancellationToken::new();
    let logger_cancel = log_cancel.clone();
    let logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = logger_cancel.cancelled() => break,
                changed = profiles.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = profiles.borrow_and_update().clone();
                    for (id, state) in snapshot {
                        tracing::info!(
                            "Profile {}: {} (data: {:?}, error: {:?})",
                            id,
                            state.status,
                            state.data_count,
                            state.last_error_code
                        );
                    }
                }
            }
        }
    });

    if let Err(e) = orchestrator
        .connect_with_cancel(&profile, args.force, &cancel)
        .await
    {
        tracing::error!("Unable to connect: {}", e.user_message());
        log_cancel.cancel();
        let _ = logger.await;
        orchestrator.shutdown().await;
        return Err(e).context("Connection failed");
    }

    cancel.cancelled().await;

    if let Err(e) = orchestrator.disconnect(&profile.id).await {
        tracing::error!("Unable to disconnect: {}", e);
    }
    log_cancel.cancel();
    let _ = logger.await;
    orchestrator.shutdown().await;

    tracing::info!("Daemon shutdown complete");
    Ok(())
}
