mod config;
mod controller;
mod error;
mod huggingface;
mod models;
mod routes;
mod store;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::controller::GenerationController;
use crate::huggingface::HfClient;
use crate::routes::{router, AppState};
use crate::store::ImageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    if let Some(key) = &config.hf.api_key {
        tracing::info!("Using API key: {}...", key.chars().take(10).collect::<String>());
    }

    let images = ImageStore::new();
    let client = HfClient::new(&config.hf, images.clone())
        .context("cannot start without a Hugging Face API key")?;
    tracing::info!(
        endpoint = client.endpoint(),
        advanced_parameters = config.hf.supports_advanced_parameters,
        "Inference client ready"
    );

    let state = AppState {
        controller: Arc::new(GenerationController::new(Arc::new(client))),
        images,
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
