//! HTTP server publishing an npm registry mirror.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use npm_mirror_core::MirrorConfig;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use npm_mirror_server::{create_router, AppState, ServerConfig};

#[derive(Parser)]
#[command(name = "npm-mirror-server")]
#[command(about = "Serve a mirrored npm registry over HTTP")]
struct Cli {
    /// Mirror root directory; defaults to the root named in the config file
    #[arg(long)]
    root: Option<PathBuf>,

    /// Mirror configuration file to take the root from
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port number
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let root = match (cli.root, cli.config) {
        (Some(root), _) => root,
        (None, Some(path)) => {
            MirrorConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
                .root
        }
        (None, None) => ServerConfig::default().root,
    };

    let config = ServerConfig::new()
        .with_root(root)
        .with_bind_address(&cli.bind)
        .with_port(cli.port);

    info!("Starting npm-mirror-server");
    info!("Mirror root: {}", config.root.display());
    if !config.root.is_dir() {
        warn!("Mirror root does not exist yet; every request will 404 until a sync runs");
    }
    info!("Listening on {}", config.bind_addr());

    let app = create_router(AppState::new(&config.root));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr()).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
