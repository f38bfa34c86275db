use crate::metrics::WorkerMetrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tracing::info;

async fn metrics_handler(State(metrics): State<Arc<WorkerMetrics>>) -> (StatusCode, String) {
    match metrics.encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn metrics_router(metrics: Arc<WorkerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/metrics` on `addr` until the process exits
pub(crate) async fn serve_metrics(
    metrics: Arc<WorkerMetrics>,
    addr: String,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, metrics_router(metrics)).await
}
