//! Lyre streaming service - main entry point
//!
//! Loads configuration, starts the buffer pool sweeper and serves the HTTP
//! API until Ctrl+C or SIGTERM.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lyre_common::config::LoggingConfig;
use lyre_stream::api::{self, AppState};
use lyre_stream::buffer::BufferPool;
use lyre_stream::config::Config;
use lyre_stream::source::DefaultTrackSource;

/// Command-line arguments for lyre-stream
#[derive(Parser, Debug)]
#[command(name = "lyre-stream")]
#[command(about = "Audio ingestion and transform service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "LYRE_PORT")]
    port: Option<u16>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "LYRE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::resolve(args.config.as_deref(), args.port)
        .context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(
        "Starting lyre-stream {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("LYRE_GIT_HASH")
    );
    info!(
        "Streaming {}, mixer {}, resampler {}",
        if config.streaming.enabled { "enabled" } else { "disabled" },
        if config.streaming.mixer_enabled { "enabled" } else { "disabled" },
        config.streaming.resampler_quality
    );

    let sweep_interval = Duration::from_secs(config.streaming.pool_sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            BufferPool::global().sweep();
        }
    });

    let source = DefaultTrackSource::new().context("Failed to create track source")?;
    let state = AppState::new(config.streaming.clone(), Arc::new(source));
    let app = api::create_router(state);

    info!("Starting HTTP server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level applies to our targets
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("lyre_stream={0},lyre_common={0},tower_http={0}", logging.level).into()
    });

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
