//! Test fixtures for generating test data and requests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use pwnhub_metadata::{ArtifactRow, MetadataStore, NewArtifact};
use pwnhub_storage::{ObjectStore, artifact_key};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::OffsetDateTime;
use tower::ServiceExt;

pub const BOUNDARY: &str = "pwnhub-test-boundary";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// One multipart part: (field name, optional file name, contents).
pub type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

/// Build a multipart/form-data body from parts, in order.
#[allow(dead_code)]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            ),
            None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Send a request and return status plus parsed JSON (Null if not JSON).
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    (status, json)
}

/// JSON request helper.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    send(router, builder.body(body).unwrap()).await
}

/// Multipart upload helper.
#[allow(dead_code)]
pub async fn upload(router: &axum::Router, parts: &[Part<'_>]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/handshakes/upload")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    send(router, request).await
}

/// Insert an artifact directly, bypassing the upload path, so tests control
/// `uploaded_at`.
#[allow(dead_code)]
pub async fn seed_artifact(
    metadata: &Arc<dyn MetadataStore>,
    storage: &Arc<dyn ObjectStore>,
    serial: &str,
    filename: &str,
    size: usize,
    uploaded_at: OffsetDateTime,
) -> ArtifactRow {
    metadata.ensure_device(serial, uploaded_at).await.unwrap();
    let data = seeded_bytes(size as u64, size);
    let mut upload = storage
        .put_stream(&artifact_key(serial, filename))
        .await
        .unwrap();
    upload.write(data.clone()).await.unwrap();
    upload.finish().await.unwrap();
    metadata
        .record_artifact(&NewArtifact {
            serial: serial.to_string(),
            filename: filename.to_string(),
            size_bytes: size as i64,
            content_hash: sha256_hex(&data),
            uploaded_at,
        })
        .await
        .unwrap()
}
