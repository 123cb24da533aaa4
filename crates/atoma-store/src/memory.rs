//! Deterministic in-memory coordination store.
//!
//! Thread-safe, versioned by a single monotonically increasing revision
//! counter shared by all keys. Supports per-key change notification through
//! `tokio::sync::watch` and fault injection for exercising retry paths.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::error::StoreError;
use crate::traits::CoordinationStore;
use crate::types::CreateOutcome;
use crate::types::VersionedRecord;
use crate::types::WriteOutcome;

#[derive(Default)]
struct Records {
    data: BTreeMap<String, VersionedRecord>,
    revision: u64,
}

impl Records {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }
}

/// A deterministic in-memory [`CoordinationStore`].
///
/// Every mutation bumps a global revision which becomes the new version of the
/// touched key, so versions are unique across the whole store.
///
/// # Fault injection
///
/// - [`set_unavailable`](Self::set_unavailable) makes every operation fail
///   until cleared.
/// - [`fail_next`](Self::fail_next) makes the next `n` operations fail.
///
/// Failed operations return [`StoreError::Unavailable`] and have no effect.
///
/// [`lose_next_acks`](Self::lose_next_acks) is the opposite case: the next
/// `n` successful writes take effect but still report
/// [`StoreError::Unavailable`], as if the reply was lost.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    records: Mutex<Records>,
    watchers: Mutex<HashMap<String, watch::Sender<u64>>>,
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    lose_acks: AtomicU32,
    operations: AtomicU64,
}

impl InMemoryCoordinationStore {
    /// Create a new store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent operation fail (or succeed again) until toggled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` successful writes report [`StoreError::Unavailable`]
    /// after they have been applied.
    pub fn lose_next_acks(&self, count: u32) {
        self.lose_acks.store(count, Ordering::SeqCst);
    }

    /// Total number of operations attempted, failed ones included.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.lock().data.len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().data.is_empty()
    }

    /// Keys currently stored under `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.records
            .lock()
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn check_available(&self, operation: &str) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                operation: operation.to_string(),
                reason: "store marked unavailable".to_string(),
            });
        }

        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::Unavailable {
                operation: operation.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        Ok(())
    }

    fn acknowledge<T>(&self, operation: &str, outcome: T) -> Result<T, StoreError> {
        let lost = self
            .lose_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            trace!(operation, "dropping acknowledgement of applied write");
            return Err(StoreError::Unavailable {
                operation: operation.to_string(),
                reason: "acknowledgement lost".to_string(),
            });
        }
        Ok(outcome)
    }

    fn notify(&self, key: &str, version: u64) {
        if let Some(sender) = self.watchers.lock().get(key) {
            sender.send_replace(version);
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn read_record(&self, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        self.check_available("read_record")?;
        Ok(self.records.lock().data.get(key).cloned())
    }

    async fn write_if_version(
        &self,
        key: &str,
        expected_version: u64,
        value: String,
    ) -> Result<WriteOutcome, StoreError> {
        self.check_available("write_if_version")?;

        let outcome = {
            let mut records = self.records.lock();
            let current = records.data.get(key).map(|r| r.version);
            if current != Some(expected_version) {
                trace!(key, expected_version, ?current, "version conflict");
                WriteOutcome::Conflict
            } else {
                let version = records.next_revision();
                records.data.insert(key.to_string(), VersionedRecord { value, version });
                WriteOutcome::Written { version }
            }
        };

        if let WriteOutcome::Written { version } = outcome {
            self.notify(key, version);
            return self.acknowledge("write_if_version", outcome);
        }
        Ok(outcome)
    }

    async fn create_if_absent(&self, key: &str, value: String) -> Result<CreateOutcome, StoreError> {
        self.check_available("create_if_absent")?;

        let outcome = {
            let mut records = self.records.lock();
            if records.data.contains_key(key) {
                CreateOutcome::AlreadyExists
            } else {
                let version = records.next_revision();
                records.data.insert(key.to_string(), VersionedRecord { value, version });
                CreateOutcome::Created { version }
            }
        };

        if let CreateOutcome::Created { version } = outcome {
            self.notify(key, version);
            return self.acknowledge("create_if_absent", outcome);
        }
        Ok(outcome)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available("delete")?;

        let removed = {
            let mut records = self.records.lock();
            let removed = records.data.remove(key).is_some();
            if removed {
                Some(records.next_revision())
            } else {
                None
            }
        };

        match removed {
            Some(revision) => {
                self.notify(key, revision);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe(&self, key: &str) -> Option<watch::Receiver<u64>> {
        let current = self.records.lock().data.get(key).map(|r| r.version).unwrap_or(0);
        let mut watchers = self.watchers.lock();
        watchers.retain(|_, sender| sender.receiver_count() > 0);
        let sender = watchers.entry(key.to_string()).or_insert_with(|| watch::channel(current).0);
        Some(sender.subscribe())
    }
}
