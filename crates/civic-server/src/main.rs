//! civicsync server - main entry point

use anyhow::{Context, Result};
use clap::Parser;
use civic_common::logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use civic_server::{api, config::Config, ingest::AdapterRegistry, services::CoreServices};

#[derive(Parser, Debug)]
#[command(name = "civic-server", version, about = "civicsync orchestration server")]
struct Args {
    /// Config file (defaults to $CIVIC_CONFIG or ./civicsync.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Keep all state in memory instead of PostgreSQL
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("civic-server")
        .filter_directives("civic_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .with_env_overrides()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting civicsync server");

    dotenvy::dotenv().ok();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!(
        jobs = config.jobs.len(),
        "Configuration loaded - server will bind to {}:{}",
        config.server.host,
        config.server.port
    );

    let adapters = AdapterRegistry::with_builtin();
    let services = if args.in_memory {
        warn!("Running with in-memory state; nothing will survive a restart");
        CoreServices::in_memory(config, adapters)
    } else {
        CoreServices::postgres(config, adapters).await?
    };

    services.sync_jobs().await.context("synchronising job registry")?;
    let swept = services.sweep_orphans().await.context("sweeping orphaned runs")?;
    if !swept.orphaned.is_empty() {
        warn!(count = swept.orphaned.len(), "Recovered orphaned runs at startup");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let scheduler = if services.config.scheduler.enabled {
        Some(tokio::spawn(services.scheduler().run(shutdown.clone())))
    } else {
        info!("Scheduler disabled; jobs run only on explicit triggers");
        None
    };

    api::serve(services.app_state(), &services.config, shutdown.clone().cancelled_owned()).await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }

    let grace = Duration::from_secs(services.config.server.shutdown_timeout_secs);
    info!(in_flight = services.dispatcher.in_flight(), "Waiting for runs to finish");
    services.dispatcher.shutdown(grace).await;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
