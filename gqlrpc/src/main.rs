//! # gqlrpc Entry Point
//!
//! Drives the server lifecycle:
//!
//! 1. **Initialization**: Parses arguments with [`cli::Cli`] and installs the log subscriber.
//! 2. **Loading**: Builds the first generation of services and operations via `gqlrpc_core`.
//! 3. **Serving**: Listens until `SIGINT`/`SIGTERM`. `SIGHUP` reloads services from disk.
mod cli;

use clap::Parser;
use cli::Cli;
use gqlrpc_core::{config::ServerConfig, server::Server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gqlrpc");

    let server = Server::new(ServerConfig::from(&args), None).await?;
    server.start().await?;

    wait_for_shutdown(&server).await?;

    server.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(server: &Server) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                // A failed reload is logged and the current services keep serving.
                let _ = server.reload().await;
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                return Ok(());
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl-C, shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_server: &Server) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, shutting down");
    Ok(())
}
