use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::metrics::Metrics;

/// Serves `GET /metrics` on the given port until the token is cancelled.
pub async fn serve_metrics(
    metrics: Arc<Metrics>,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics exporter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> Result<String, StatusCode> {
    metrics.render().map_err(|err| {
        error!(error = %err, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
