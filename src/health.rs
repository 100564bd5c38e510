//! Liveness endpoint for process supervision. Runs on its own task and
//! shares no state with the orchestrator.

use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Binds the listener and serves the health router in the background.
pub async fn spawn(port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint started");

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router()).await {
            error!(error = %error, "health endpoint terminated unexpectedly");
        }
    });

    Ok(())
}
