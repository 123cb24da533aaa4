//! The store trait consumed by the coordination engine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::types::CreateOutcome;
use crate::types::VersionedRecord;
use crate::types::WriteOutcome;

/// Atomic keyed record storage with optimistic versioning.
///
/// Implementations must make `write_if_version` and `create_if_absent` atomic
/// per key, and must never hand out the same version twice for one key.
/// Connectivity problems are reported as [`StoreError::Unavailable`]; the
/// coordination engine retries those with backoff.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read the record stored under `key`, if any.
    async fn read_record(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError>;

    /// Replace the record under `key` if it is still at `expected_version`.
    async fn write_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: String,
    ) -> Result<WriteOutcome, StoreError>;

    /// Create the record under `key` unless one already exists.
    async fn create_if_absent(&self, key: &str, value: String) -> Result<CreateOutcome, StoreError>;

    /// Remove the record under `key`. Returns whether a record existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Subscribe to changes of `key`.
    ///
    /// The receiver is marked changed on every successful write or delete of
    /// the key. Stores without change notification return `None` and callers
    /// fall back to polling.
    fn subscribe(&self, _key: &str) -> Option<watch::Receiver<u64>> {
        None
    }
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for Arc<T> {
    async fn read_record(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        (**self).read_record(key).await
    }

    async fn write_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: String,
    ) -> Result<WriteOutcome, StoreError> {
        (**self).write_if_version(key, expected_version, value).await
    }

    async fn create_if_absent(&self, key: &str, value: String) -> Result<CreateOutcome, StoreError> {
        (**self).create_if_absent(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    fn subscribe(&self, key: &str) -> Option<watch::Receiver<u64>> {
        (**self).subscribe(key)
    }
}
