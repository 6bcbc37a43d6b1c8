//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit =
        usize::try_from(state.config.server.max_upload_bytes).unwrap_or(usize::MAX);

    let device_routes = Router::new()
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/devices/register", post(handlers::register_device))
        .route("/api/devices/heartbeat", post(handlers::heartbeat))
        .route("/api/devices/{serial}", get(handlers::get_device))
        .route(
            "/api/devices/{serial}/provision-ssh",
            post(handlers::provision_ssh),
        );

    let handshake_routes = Router::new()
        .route("/api/handshakes", get(handlers::list_handshakes))
        .route(
            "/api/handshakes/upload",
            post(handlers::upload_handshake).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/handshakes/{serial}",
            get(handlers::list_device_handshakes),
        )
        .route(
            "/api/handshakes/{serial}/{filename}",
            get(handlers::download_handshake),
        );

    let system_routes = Router::new()
        .route("/", get(handlers::service_info))
        // Unauthenticated for load balancer health checks.
        .route("/health", get(handlers::health_check))
        .route("/api/retention/run", post(handlers::trigger_retention));

    let mut router = Router::new()
        .merge(device_routes)
        .merge(handshake_routes)
        .merge(system_routes);

    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
