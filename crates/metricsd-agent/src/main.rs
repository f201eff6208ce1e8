use anyhow::{Context, Result};
use clap::Parser;
use metricsd_agent::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use metricsd_agent::{build_registry, health, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Host and application telemetry agent.
#[derive(Debug, Parser)]
#[command(name = "metricsd", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Load and validate the configuration and plugins, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level.parse().context("Invalid --log-level")?)
                .from_env_lossy(),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "metricsd starting");

    let config = AgentConfig::load(&cli.config)?;
    tracing::info!(config_file = %cli.config.display(), "Configuration loaded");

    let registry = build_registry(&config)?;
    let shipper = metricsd_shipper::build_shipper(&config.shipper_config()?)
        .context("Failed to initialize shipper")?;

    if cli.check {
        tracing::info!(sources = ?registry.source_names(), "Configuration is valid");
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind health listener on {}", config.listen_addr()))?;

    let shutdown = CancellationToken::new();
    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        shipper,
        config.interval(),
        config.global_labels.clone(),
    ));

    let mut health_task = tokio::spawn(health::serve(listener, shutdown.clone()));
    let orchestrator_task = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(shutdown).await })
    };

    let health_exited = tokio::select! {
        () = shutdown_signal() => false,
        res = &mut health_task => {
            match res {
                Ok(Ok(())) => tracing::error!("Health listener exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Health listener failed"),
                Err(e) => tracing::error!(error = %e, "Health listener task panicked"),
            }
            true
        }
    };

    tracing::info!("Initiating graceful shutdown");
    shutdown.cancel();
    orchestrator.stop();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if !health_exited {
            if let Ok(Err(e)) = health_task.await {
                tracing::error!(error = %e, "Error during health listener shutdown");
            }
        }
        let _ = orchestrator_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Shutdown grace period elapsed with work outstanding"
        );
    }

    tracing::info!("metricsd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!(signal = "SIGINT", "Received shutdown signal"),
        () = terminate => tracing::info!(signal = "SIGTERM", "Received shutdown signal"),
    }
}
