//! partyq - shared party queue server

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use partyq_common::config::BackendKind;
use partyq_server::config::{self, CliOverrides};
use partyq_server::{app, App};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for partyq
#[derive(Parser, Debug)]
#[command(name = "partyq")]
#[command(about = "Shared party queue backed by an external playback service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PARTYQ_PORT")]
    port: Option<u16>,

    /// Playback backend (spotify or memory)
    #[arg(short, long, env = "PARTYQ_BACKEND")]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = config::load(&CliOverrides {
        config: args.config,
        port: args.port,
        backend: args.backend,
    })
    .context("Failed to load configuration")?;
    let cfg = loaded.config;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::log_filter(&cfg.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting partyq v{}", env!("CARGO_PKG_VERSION"));
    match &loaded.source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => warn!("No config file found, running on built-in defaults"),
    }

    let backend = app::build_backend(&cfg).context("Failed to initialize playback backend")?;
    let app = App::new(&cfg, backend);

    let cancel = CancellationToken::new();
    let scheduler_task = app.scheduler.spawn(cancel.clone());

    let addr: SocketAddr = format!("{}:{}", cfg.server.bind, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cfg.server.bind, cfg.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    scheduler_task.await.context("Scheduler task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
