//! Object store wrappers for failure injection.

use async_trait::async_trait;
use pwnhub_storage::{
    ByteStream, ObjectMeta, ObjectStore, StorageError, StorageResult, StreamingUpload,
};
use std::sync::Arc;
use tokio::sync::Notify;

/// Delegates to an inner store, failing or pausing deletes on request.
#[allow(dead_code)]
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    /// Deletes of keys under this prefix fail with an I/O error.
    fail_delete_prefix: Option<String>,
    /// When set, each delete signals `.0` and then waits for `.1`.
    delete_gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn failing_deletes(inner: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            inner,
            fail_delete_prefix: Some(prefix.to_string()),
            delete_gate: None,
        }
    }

    pub fn gated_deletes(
        inner: Arc<dyn ObjectStore>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    ) -> Self {
        Self {
            inner,
            fail_delete_prefix: None,
            delete_gate: Some((entered, release)),
        }
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if let Some((entered, release)) = &self.delete_gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(prefix) = &self.fail_delete_prefix
            && key.starts_with(prefix.as_str())
        {
            return Err(StorageError::Io(std::io::Error::other(
                "injected delete failure",
            )));
        }
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
