//! Service info, health and manual retention endpoints.

use crate::error::{ApiError, ApiResult};
use crate::retention::{RetentionError, RetentionStats};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use time::OffsetDateTime;

/// Service identification.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET / - Service name and version.
pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "pwnhub",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /health - Check the metadata store and storage backend.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state
        .metadata
        .health_check()
        .await
        .map_err(|e| ApiError::Unavailable(format!("metadata store: {e}")))?;
    state
        .storage
        .health_check()
        .await
        .map_err(|e| ApiError::Unavailable(format!("storage backend: {e}")))?;

    Ok(Json(HealthResponse { status: "ok" }))
}

/// POST /api/retention/run - Run one retention pass now.
///
/// The pass runs on its own task so a client disconnect cannot drop it part
/// way through a device.
pub async fn trigger_retention(State(state): State<AppState>) -> ApiResult<Json<RetentionStats>> {
    let engine = state.retention.clone();
    let shutdown = state.shutdown.clone();
    let pass = tokio::spawn(async move {
        engine
            .run_once(OffsetDateTime::now_utc(), &shutdown)
            .await
    });
    let result = pass
        .await
        .map_err(|e| ApiError::Internal(format!("retention task failed: {e}")))?;

    match result {
        Ok(stats) => {
            tracing::info!(
                devices = stats.devices_processed,
                deleted = stats.total_deleted(),
                bytes_reclaimed = stats.bytes_reclaimed,
                device_failures = stats.device_failures,
                "Manual retention pass completed"
            );
            Ok(Json(stats))
        }
        Err(RetentionError::AlreadyRunning) => Err(ApiError::Conflict(
            "a retention pass is already running".to_string(),
        )),
        Err(RetentionError::Metadata(e)) => Err(e.into()),
    }
}
