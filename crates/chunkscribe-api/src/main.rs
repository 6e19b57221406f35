//! Main entry point for the chunkscribe API server

use anyhow::Context;
use chunkscribe_api::{AppState, build_app, build_collaborators};
use chunkscribe_core::{Config, init_logging};
use chunkscribe_transcriber::Orchestrator;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Long-form audio transcription server
#[derive(Debug, Parser)]
#[command(name = "chunkscribe-server", version, about)]
struct Cli {
    /// Configuration file (defaults to ./chunkscribe.{toml,json,yaml} when present)
    #[arg(short, long, env = "CHUNKSCRIBE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: .env file not loaded: {e}");
    }

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    info!(
        "Starting chunkscribe v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );
    info!(
        "Routing: chunked above {}s, rejected above {}s, {}s chunks, {} concurrent chunk(s)",
        config.chunking.long_form_threshold_seconds,
        config.chunking.max_duration_seconds,
        config.chunking.chunk_length_seconds,
        config.chunking.max_concurrent_chunks
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let collaborators = build_collaborators(&config).context("Failed to set up collaborators")?;
    let orchestrator = Arc::new(Orchestrator::new(config, collaborators));
    orchestrator.start();

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator))?);
    state.validate()?;
    let app = build_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, waiting for running jobs");
    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolve when Ctrl+C or SIGTERM arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        () = terminate => info!("Received terminate signal, shutting down gracefully..."),
    }
}
