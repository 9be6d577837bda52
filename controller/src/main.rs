//! domeguard binary.
//!
//! Connects to the configured INDI devices and runs the observatory safety
//! loop until interrupted.

use anyhow::Context;
use clap::Parser;
use domeguard::{ObservatoryConfig, ObservatoryContext};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Observatory safety controller.
#[derive(Parser, Debug)]
#[command(name = "domeguard")]
#[command(about = "Open and close an unattended observatory from its safety sensors")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "domeguard.toml")]
    config: PathBuf,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Evaluate and report, but never park or unpark.
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = ObservatoryConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        mode = ?config.mode,
        mount = %config.mount.device,
        dome = ?config.enclosure().map(|d| &d.device),
        weather = ?config.weather.as_ref().map(|w| &w.device),
        max_pending = config.max_pending,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        shutdown.cancel();
    });

    let context = ObservatoryContext::build(&config, &cancel, cli.dry_run)
        .await
        .context("connecting observatory devices")?;
    let mut controller = context.into_controller();

    if cli.once {
        let outcome = controller.cycle().await;
        info!(state = %outcome.state, pending_count = outcome.pending_count, "Single cycle complete");
    } else {
        controller.run(&cancel).await;
    }

    controller.shutdown().await;
    info!("domeguard stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
