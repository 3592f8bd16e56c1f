use crate::ingress::api::{
    get_parameters, get_schemas, get_status, health_check, put_events, put_records, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(put_events))
        .route("/delivery-stream/records", post(put_records))
        .route("/status", get(get_status))
        .route("/parameters", get(get_parameters))
        .route("/schemas", get(get_schemas))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the bus API on an already bound listener until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Bus HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Bus HTTP server shutting down gracefully");
        })
        .await
}
