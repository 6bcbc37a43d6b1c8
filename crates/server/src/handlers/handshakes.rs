//! Capture upload, listing and download endpoints.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::attachment_disposition;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use pwnhub_core::{ArtifactList, UploadResponse, validate_serial};
use pwnhub_storage::artifact_key;

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// POST /api/handshakes/upload - Multipart upload of one capture file.
///
/// Expects a `serial` text field followed by a `file` field. The file body
/// is streamed straight into storage.
pub async fn upload_handshake(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut serial: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("serial") => {
                let value = field.text().await.map_err(multipart_error)?;
                serial = Some(value.trim().to_string());
            }
            Some("file") => {
                let Some(serial) = serial.as_deref() else {
                    return Err(ApiError::BadRequest(
                        "serial field must precede the file field".to_string(),
                    ));
                };
                let file_name = field.file_name().map(str::to_owned);
                let body = field.map(|chunk| chunk.map_err(multipart_error));

                let record = state
                    .artifacts
                    .store(serial, file_name.as_deref(), body)
                    .await?;

                return Ok(Json(UploadResponse {
                    status: "ok".to_string(),
                    filename: record.filename,
                    sha256: record.content_hash,
                    size_bytes: record.size_bytes,
                }));
            }
            _ => {
                tracing::debug!(field = ?field.name(), "Ignoring unknown multipart field");
            }
        }
    }

    Err(ApiError::BadRequest(match serial {
        Some(_) => "missing file field".to_string(),
        None => "missing serial field".to_string(),
    }))
}

/// GET /api/handshakes - Every stored capture, newest first.
pub async fn list_handshakes(State(state): State<AppState>) -> ApiResult<Json<ArtifactList>> {
    let rows = state.metadata.list_artifacts().await?;
    Ok(Json(ArtifactList {
        handshakes: rows.into_iter().map(Into::into).collect(),
    }))
}

/// GET /api/handshakes/{serial} - One device's captures, newest first.
pub async fn list_device_handshakes(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> ApiResult<Json<ArtifactList>> {
    validate_serial(&serial)?;
    let rows = state.metadata.list_device_artifacts(&serial).await?;
    Ok(Json(ArtifactList {
        handshakes: rows.into_iter().map(Into::into).collect(),
    }))
}

/// GET /api/handshakes/{serial}/{filename} - Stream a stored capture.
pub async fn download_handshake(
    State(state): State<AppState>,
    Path((serial, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    validate_serial(&serial)?;
    let record = state
        .metadata
        .get_artifact(&serial, &filename)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("capture {serial}/{filename} not found")))?;

    let key = artifact_key(&record.serial, &record.filename);
    let meta = match state.storage.head(&key).await {
        Ok(meta) => meta,
        Err(e) if e.is_not_found() => {
            tracing::warn!(key = %key, "Capture record has no stored file");
            return Err(ApiError::NotFound(format!(
                "capture {serial}/{filename} not found"
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let stream = state.storage.get_stream(&key).await?;
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, meta.size.to_string()),
            (
                CONTENT_DISPOSITION,
                attachment_disposition(&record.filename),
            ),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}
