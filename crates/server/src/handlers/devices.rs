//! Device registry endpoints.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::ClientIp;
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use pwnhub_core::{DeviceRecord, HeartbeatRequest, RegisterRequest, validate_serial};
use pwnhub_metadata::MetadataError;
use serde::Serialize;
use time::OffsetDateTime;

/// Plain acknowledgement.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Result of a successful SSH key provisioning.
#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub status: &'static str,
    pub ip: String,
    pub output: String,
}

/// POST /api/devices/register - Full-replace registration.
pub async fn register_device(
    State(state): State<AppState>,
    client_ip: ClientIp,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<DeviceRecord>> {
    request.validate()?;

    let row = state
        .metadata
        .register_device(&request, client_ip.as_deref(), OffsetDateTime::now_utc())
        .await?;

    metrics::DEVICE_REGISTRATIONS.inc();
    tracing::info!(
        serial = %row.serial,
        hostname = ?row.hostname,
        image_generation = row.image_generation,
        client_ip = ?client_ip.as_deref(),
        "Device registered"
    );

    Ok(Json(row.into()))
}

/// POST /api/devices/heartbeat - Sparse liveness update.
pub async fn heartbeat(
    State(state): State<AppState>,
    client_ip: ClientIp,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<StatusResponse>> {
    request.validate()?;

    match state
        .metadata
        .heartbeat_device(&request, client_ip.as_deref(), OffsetDateTime::now_utc())
        .await
    {
        Ok(()) => {}
        Err(MetadataError::NotFound(_)) => {
            metrics::DEVICE_HEARTBEATS_UNKNOWN.inc();
            tracing::debug!(serial = %request.serial, "Heartbeat from unregistered device");
            return Err(ApiError::NotFound(format!(
                "device {} is not registered",
                request.serial
            )));
        }
        Err(e) => return Err(e.into()),
    }

    metrics::DEVICE_HEARTBEATS.inc();
    tracing::debug!(serial = %request.serial, "Heartbeat accepted");
    Ok(Json(StatusResponse { status: "ok" }))
}

/// GET /api/devices - All devices, most recently seen first.
pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Json<Vec<DeviceRecord>>> {
    let rows = state.metadata.list_devices().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /api/devices/{serial}
pub async fn get_device(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> ApiResult<Json<DeviceRecord>> {
    validate_serial(&serial)?;
    let row = state
        .metadata
        .get_device(&serial)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {serial} not found")))?;
    Ok(Json(row.into()))
}

/// POST /api/devices/{serial}/provision-ssh - Push the hub's SSH key.
pub async fn provision_ssh(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> ApiResult<Json<ProvisionResponse>> {
    validate_serial(&serial)?;
    let device = state
        .metadata
        .get_device(&serial)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {serial} not found")))?;

    let (ip, output) = match state.provisioner.provision(device.last_ip.as_deref()).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(serial = %serial, error = %e, "SSH provisioning failed");
            return Err(e.into());
        }
    };

    state.metadata.set_ssh_provisioned(&serial, true).await?;
    tracing::info!(serial = %serial, ip = %ip, "SSH key provisioned");

    Ok(Json(ProvisionResponse {
        status: "ok",
        ip: ip.to_string(),
        output,
    }))
}
