//! Prometheus metrics for the pwnhub server.
//!
//! Covers device check-ins, capture uploads and retention passes. The
//! `/metrics` endpoint is unauthenticated and is only mounted when
//! `server.metrics_enabled` is set.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Device metrics
pub static DEVICE_REGISTRATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_device_registrations_total",
        "Total number of device registrations",
    )
    .expect("metric creation failed")
});

pub static DEVICE_HEARTBEATS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_device_heartbeats_total",
        "Total number of accepted heartbeats",
    )
    .expect("metric creation failed")
});

pub static DEVICE_HEARTBEATS_UNKNOWN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_device_heartbeats_unknown_total",
        "Heartbeats rejected because the device was never registered",
    )
    .expect("metric creation failed")
});

// Artifact metrics
pub static ARTIFACTS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_artifacts_stored_total",
        "Total number of capture files stored",
    )
    .expect("metric creation failed")
});

pub static ARTIFACT_BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_artifact_bytes_stored_total",
        "Total bytes of capture files stored",
    )
    .expect("metric creation failed")
});

pub static ARTIFACT_STORE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pwnhub_artifact_store_failures_total",
            "Failed capture uploads by stage",
        ),
        &["stage"],
    )
    .expect("metric creation failed")
});

// Retention metrics
pub static RETENTION_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("pwnhub_retention_runs_total", "Retention passes by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static RETENTION_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pwnhub_retention_deleted_total",
            "Capture files deleted by retention, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static RETENTION_BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_retention_bytes_reclaimed_total",
        "Total bytes reclaimed by retention",
    )
    .expect("metric creation failed")
});

pub static RETENTION_DEVICE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pwnhub_retention_device_failures_total",
        "Devices whose retention pass failed",
    )
    .expect("metric creation failed")
});

pub static RETENTION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pwnhub_retention_duration_seconds",
            "Duration of a full retention pass",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(DEVICE_REGISTRATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DEVICE_HEARTBEATS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DEVICE_HEARTBEATS_UNKNOWN.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(ARTIFACTS_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARTIFACT_BYTES_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARTIFACT_STORE_FAILURES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(RETENTION_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RETENTION_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RETENTION_BYTES_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RETENTION_DEVICE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RETENTION_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed upload at the given stage.
pub fn record_store_failure(stage: &str) {
    ARTIFACT_STORE_FAILURES.with_label_values(&[stage]).inc();
}
