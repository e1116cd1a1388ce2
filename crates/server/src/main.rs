//! Scene Relay Server
//!
//! Small HTTP surface in front of a remote streaming-software instance:
//! lists its scenes and switches the active one.

use std::net::SocketAddr;

use anyhow::Context;
use scenerelay_client::Connector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod config;
mod routes;
mod state;

use config::RelayConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scenerelay_server=debug,scenerelay_client=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env();
    tracing::debug!("Configuration: {:?}", config);

    let connector = Connector::websocket(config.connector.clone());
    if config.connect_on_start {
        match connector.connect().await {
            Ok(()) => tracing::info!("Connected to the remote"),
            Err(e) => tracing::error!(
                "Failed to connect to the remote at startup: {}. GET /streamlabs retries.",
                e
            ),
        }
    }

    let app = app::router(AppState::new(connector.clone()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    connector.disconnect();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully");
}
