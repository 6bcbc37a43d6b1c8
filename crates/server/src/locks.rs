//! Per-device async locks.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type LockStorage = DashMap<String, (Arc<Mutex<()>>, Instant)>;

/// Per-serial async mutex.
///
/// Different devices lock independently; work on the same device is
/// serialized. Entries remember when they were last handed out so idle ones
/// can be dropped.
#[derive(Clone, Default)]
pub struct DeviceLocks {
    locks: Arc<LockStorage>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a serial.
    pub fn get(&self, serial: &str) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(serial.to_string())
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    /// Wait for and hold the lock for a serial.
    pub async fn lock(&self, serial: &str) -> OwnedMutexGuard<()> {
        self.get(serial).lock_owned().await
    }

    /// Drop entries idle for longer than `max_idle` that nobody holds.
    /// Returns the number removed.
    pub fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        // strong_count == 1 means only the map references the lock.
        self.locks.retain(|_, (lock, last_access)| {
            Arc::strong_count(lock) > 1 || now.duration_since(*last_access) <= max_idle
        });
        before.saturating_sub(self.locks.len())
    }

    /// Periodically drop idle entries until `cancel` fires.
    pub fn spawn_cleanup_task(
        self,
        interval: Duration,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let removed = self.cleanup_stale(max_idle);
                if removed > 0 {
                    tracing::debug!(
                        removed = removed,
                        remaining = self.len(),
                        "Cleaned up idle device locks"
                    );
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_serial_shares_a_lock() {
        let locks = DeviceLocks::new();
        assert!(Arc::ptr_eq(&locks.get("AA"), &locks.get("AA")));
        assert!(!Arc::ptr_eq(&locks.get("AA"), &locks.get("BB")));
    }

    #[test]
    fn cleanup_keeps_held_and_fresh_entries() {
        let locks = DeviceLocks::new();
        let old = Instant::now() - Duration::from_secs(10);
        locks
            .locks
            .insert("stale".to_string(), (Arc::new(Mutex::new(())), old));
        locks
            .locks
            .insert("held".to_string(), (Arc::new(Mutex::new(())), old));
        let _held = locks.locks.get("held").unwrap().0.clone();
        locks.get("fresh");

        assert_eq!(locks.cleanup_stale(Duration::from_secs(5)), 1);
        assert!(locks.locks.contains_key("held"));
        assert!(locks.locks.contains_key("fresh"));
        assert!(!locks.locks.contains_key("stale"));
    }

    #[tokio::test]
    async fn lock_serializes_same_serial() {
        let locks = DeviceLocks::new();
        let guard = locks.lock("AA").await;
        assert!(locks.get("AA").try_lock().is_err());
        assert!(locks.get("BB").try_lock().is_ok());
        drop(guard);
        assert!(locks.get("AA").try_lock().is_ok());
    }

    #[tokio::test]
    async fn cleanup_task_stops_on_cancel() {
        let locks = DeviceLocks::new();
        let cancel = CancellationToken::new();
        let handle = locks.clone().spawn_cleanup_task(
            Duration::from_secs(3600),
            Duration::from_secs(60),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
