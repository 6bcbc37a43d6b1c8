//! Capture retention.
//!
//! Each pass walks every device and applies two rules in order: files older
//! than `max_age` are deleted, then the oldest remaining files are deleted
//! while the device's total size exceeds `max_bytes_per_device`. The
//! device's `handshake_count` is recomputed from its surviving records at
//! the end, whatever happened before.

use crate::metrics;
use pwnhub_core::config::RetentionConfig;
use pwnhub_metadata::{ArtifactRow, MetadataError, MetadataStore};
use pwnhub_storage::{ObjectStore, StorageError, artifact_key};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counters describing one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionStats {
    pub devices_processed: u64,
    pub deleted_by_age: u64,
    pub deleted_by_quota: u64,
    pub bytes_reclaimed: u64,
    pub skipped_unparseable: u64,
    pub device_failures: u64,
}

impl RetentionStats {
    pub fn total_deleted(&self) -> u64 {
        self.deleted_by_age + self.deleted_by_quota
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("a retention pass is already running")]
    AlreadyRunning,

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Why a device pass stopped early.
#[derive(Debug, thiserror::Error)]
enum DeviceError {
    #[error("storage error on {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

#[derive(Clone, Copy)]
enum Reason {
    Age,
    Quota,
}

impl Reason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Quota => "quota",
        }
    }
}

/// Applies the age and size limits to stored captures.
pub struct RetentionEngine {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    config: RetentionConfig,
    running: Mutex<()>,
}

impl RetentionEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Run one pass over every device as of `now`.
    ///
    /// Returns [`RetentionError::AlreadyRunning`] instead of waiting when
    /// another pass holds the engine. A failure on one device is counted and
    /// logged; the remaining devices are still processed. `cancel` is only
    /// checked between devices, so a device that was started is always
    /// finished and recounted.
    pub async fn run_once(
        &self,
        now: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Result<RetentionStats, RetentionError> {
        let Ok(_guard) = self.running.try_lock() else {
            metrics::RETENTION_RUNS
                .with_label_values(&["already_running"])
                .inc();
            return Err(RetentionError::AlreadyRunning);
        };

        let started = Instant::now();
        let devices = match self.metadata.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                metrics::RETENTION_RUNS.with_label_values(&["failed"]).inc();
                return Err(e.into());
            }
        };

        let mut stats = RetentionStats::default();
        for (done, device) in devices.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    devices_remaining = devices.len() - done,
                    "Retention pass stopped by shutdown"
                );
                metrics::RETENTION_DURATION.observe(started.elapsed().as_secs_f64());
                metrics::RETENTION_RUNS.with_label_values(&["cancelled"]).inc();
                return Ok(stats);
            }
            match self.process_device(&device.serial, now, &mut stats).await {
                Ok(()) => stats.devices_processed += 1,
                Err(e) => {
                    stats.device_failures += 1;
                    metrics::RETENTION_DEVICE_FAILURES.inc();
                    tracing::warn!(
                        serial = %device.serial,
                        error = %e,
                        "Retention failed for device, continuing with the rest"
                    );
                }
            }
        }

        metrics::RETENTION_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::RETENTION_RUNS.with_label_values(&["completed"]).inc();
        Ok(stats)
    }

    /// Age pass, quota pass, then recount. The recount runs even when a
    /// pass failed part way so the cached counter matches what survived.
    async fn process_device(
        &self,
        serial: &str,
        now: OffsetDateTime,
        stats: &mut RetentionStats,
    ) -> Result<(), DeviceError> {
        let passes = self.apply_limits(serial, now, stats).await;
        let recount = self.metadata.recount_handshakes(serial).await;

        passes?;
        let count = recount?;
        tracing::debug!(serial = %serial, handshake_count = count, "Recounted device captures");
        Ok(())
    }

    async fn apply_limits(
        &self,
        serial: &str,
        now: OffsetDateTime,
        stats: &mut RetentionStats,
    ) -> Result<(), DeviceError> {
        // A max age reaching past the earliest representable time expires nothing.
        let cutoff = now.checked_sub(self.config.max_age());

        let records = self
            .metadata
            .list_device_artifacts_oldest_first(serial)
            .await?;
        for record in &records {
            match record.uploaded_at {
                None => {
                    stats.skipped_unparseable += 1;
                    tracing::debug!(
                        serial = %serial,
                        filename = %record.filename,
                        "Skipping capture with unparseable upload time"
                    );
                }
                Some(uploaded_at) if cutoff.is_some_and(|cutoff| uploaded_at < cutoff) => {
                    self.delete_record(record, Reason::Age, stats).await?;
                }
                Some(_) => {}
            }
        }

        let mut remaining = self
            .metadata
            .list_device_artifacts_oldest_first(serial)
            .await?;
        let mut total: u64 = remaining
            .iter()
            .map(|r| u64::try_from(r.size_bytes).unwrap_or(0))
            .sum();
        let quota = self.config.max_bytes_per_device;
        if total <= quota {
            return Ok(());
        }

        // Order by parsed time; text order can differ for legacy rows.
        remaining.sort_by_key(|r| (r.uploaded_at, r.id));
        for record in remaining.iter().filter(|r| r.uploaded_at.is_some()) {
            if total <= quota {
                break;
            }
            self.delete_record(record, Reason::Quota, stats).await?;
            total = total.saturating_sub(u64::try_from(record.size_bytes).unwrap_or(0));
        }

        if total > quota {
            tracing::warn!(
                serial = %serial,
                total_bytes = total,
                quota_bytes = quota,
                "Device over quota with only unparseable captures left"
            );
        }
        Ok(())
    }

    /// Remove the file, then the record. A file that is already gone is
    /// not an error.
    async fn delete_record(
        &self,
        record: &ArtifactRow,
        reason: Reason,
        stats: &mut RetentionStats,
    ) -> Result<(), DeviceError> {
        let key = artifact_key(&record.serial, &record.filename);
        match self.storage.delete(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(key = %key, "Capture file already missing, removing record");
            }
            Err(source) => return Err(DeviceError::Storage { key, source }),
        }
        self.metadata.delete_artifact(record.id).await?;

        let size = u64::try_from(record.size_bytes).unwrap_or(0);
        match reason {
            Reason::Age => stats.deleted_by_age += 1,
            Reason::Quota => stats.deleted_by_quota += 1,
        }
        stats.bytes_reclaimed += size;
        metrics::RETENTION_DELETED
            .with_label_values(&[reason.as_str()])
            .inc();
        metrics::RETENTION_BYTES_RECLAIMED.inc_by(size);

        tracing::info!(
            serial = %record.serial,
            filename = %record.filename,
            size_bytes = size,
            reason = reason.as_str(),
            "Deleted capture"
        );
        Ok(())
    }
}

/// Spawn the periodic retention loop. The first pass runs one interval
/// after start; the loop exits when `cancel` fires, after letting a pass
/// in progress finish its current device.
pub fn spawn_scheduler(engine: Arc<RetentionEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run_scheduler(engine, cancel))
}

pub async fn run_scheduler(engine: Arc<RetentionEngine>, cancel: CancellationToken) {
    let interval = engine.config().interval();
    let cooldown = engine.config().error_cooldown();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        interval_secs = interval.as_secs(),
        max_age_secs = engine.config().max_age_secs,
        max_bytes_per_device = engine.config().max_bytes_per_device,
        "Retention scheduler started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match engine.run_once(OffsetDateTime::now_utc(), &cancel).await {
            Ok(stats) => tracing::info!(
                devices = stats.devices_processed,
                deleted_by_age = stats.deleted_by_age,
                deleted_by_quota = stats.deleted_by_quota,
                bytes_reclaimed = stats.bytes_reclaimed,
                skipped_unparseable = stats.skipped_unparseable,
                device_failures = stats.device_failures,
                "Retention pass completed"
            ),
            Err(RetentionError::AlreadyRunning) => {
                tracing::debug!("Skipping scheduled retention, a manual pass is running");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    cooldown_secs = cooldown.as_secs(),
                    "Retention pass failed"
                );
                if sleep_or_cancel(cooldown, &cancel).await {
                    break;
                }
            }
        }
    }

    tracing::info!("Retention scheduler stopped");
}

/// Returns true if cancelled before the sleep finished.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
