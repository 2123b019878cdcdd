//! Liveness probe for the hosting platform.
//!
//! A bare HTTP endpoint that shares no state with the bot; hosting
//! platforms poll it to keep the process alive and to detect crashes.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tracing::info;

/// Serve `GET /` answering 200 "OK" until the process exits.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn serve(port: u16) -> Result<()> {
    let app = Router::new().route("/", get(|| async { "✅ Bot is running" }));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot bind liveness probe to port {port}"))?;

    info!(port, "Liveness probe listening");
    axum::serve(listener, app).await.context("liveness probe failed")
}
