mod accumulator;
mod config;
mod error;
mod models;
mod prompt;
mod relay;
mod render;
mod routes;
mod upstream;

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ServerSettings, UpstreamSettings};
use crate::relay::RelayOrchestrator;
use crate::routes::AppState;
use crate::upstream::UpstreamStreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let settings = UpstreamSettings::from_env().context("upstream configuration is incomplete")?;
    let server = ServerSettings::from_env().context("server configuration is invalid")?;
    tracing::info!(
        base_url = %settings.base_url,
        model = %settings.model,
        connect_timeout = ?settings.connect_timeout,
        read_timeout = ?settings.read_timeout,
        "Using upstream completions endpoint"
    );

    let client = UpstreamStreamClient::with_reqwest(settings).context("failed to build upstream client")?;
    let state = AppState { relay: Arc::new(RelayOrchestrator::new(client)) };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(server.addr)
        .await
        .with_context(|| format!("failed to bind {}", server.addr))?;
    tracing::info!(addr = %server.addr, "Starting server");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
