//! Leases: the liveness anchor of every lock hold and barrier arrival.
//!
//! A lease is a record in the store with a deadline. While the owning client
//! renews it, every entry attributed to the lease counts. Once the deadline
//! passes (the client crashed, was partitioned, or dropped without closing)
//! other contenders treat those entries as released and prune them on their
//! next write.
//!
//! Lease state is published through a `tokio::sync::watch` cell so callers can
//! observe `Active -> Expired` and `Active -> Closed` transitions. Neither
//! transition is ever reversed.

mod manager;
mod record;
mod scheduler;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

pub use self::manager::LeaseManager;
pub use self::record::LeaseRecord;
pub(crate) use self::scheduler::RenewalScheduler;
use crate::barrier::BarrierRecord;
use crate::barrier::CyclicBarrier;
use crate::contention::ContentionQueue;
use crate::contention::ContentionRecord;
use crate::error::AtomaError;
use crate::error::Result;
use crate::pure::lease::is_lease_expired;
use crate::pure::lease::lease_key;
use crate::rwlock::ReadWriteLock;
use crate::rwlock::ResourceRecord;
use crate::types::now_unix_ms;
use crate::types::validate_resource_id;

/// Lifecycle state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// Renewed in the background; holds made under it are valid.
    Active,
    /// The deadline passed without a successful renewal, or the record vanished.
    Expired,
    /// Closed explicitly by its owner.
    Closed,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseState::Active => write!(f, "active"),
            LeaseState::Expired => write!(f, "expired"),
            LeaseState::Closed => write!(f, "closed"),
        }
    }
}

/// Kind of record a lease has entries in, for cleanup on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    Resource,
    Barrier,
}

pub(crate) struct LeaseInner {
    id: String,
    owner: String,
    ttl: Duration,
    queue: ContentionQueue,
    state: watch::Sender<LeaseState>,
    deadline_ms: AtomicU64,
    touched: Mutex<BTreeMap<String, RecordKind>>,
    renewal: CancellationToken,
}

impl LeaseInner {
    pub(crate) fn new(record: &LeaseRecord, queue: ContentionQueue, renewal: CancellationToken) -> Self {
        Self {
            id: record.lease_id.clone(),
            owner: record.owner.clone(),
            ttl: Duration::from_millis(record.ttl_ms),
            queue,
            state: watch::channel(LeaseState::Active).0,
            deadline_ms: AtomicU64::new(record.deadline_ms),
            touched: Mutex::new(BTreeMap::new()),
            renewal,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn queue(&self) -> &ContentionQueue {
        &self.queue
    }

    pub(crate) fn renewal_token(&self) -> &CancellationToken {
        &self.renewal
    }

    pub(crate) fn deadline_ms(&self) -> u64 {
        self.deadline_ms.load(Ordering::Acquire)
    }

    pub(crate) fn set_deadline_ms(&self, deadline_ms: u64) {
        self.deadline_ms.fetch_max(deadline_ms, Ordering::AcqRel);
    }

    fn current_state(&self) -> LeaseState {
        *self.state.borrow()
    }

    /// Move an active lease to `Expired`. No-op in any other state.
    pub(crate) fn mark_expired(&self, reason: &str) {
        let changed = self.state.send_if_modified(|state| {
            if *state == LeaseState::Active {
                *state = LeaseState::Expired;
                true
            } else {
                false
            }
        });

        if changed {
            warn!(lease_id = %self.id, reason, "lease expired");
            self.renewal.cancel();
        }
    }
}

/// A lease granted by an [`AtomaClient`](crate::AtomaClient).
///
/// Cheap to clone; clones share state. Locks and barriers created from a lease
/// are scoped to it: closing or losing the lease voids their holds.
#[derive(Clone)]
pub struct Lease {
    inner: Arc<LeaseInner>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("ttl", &self.inner.ttl)
            .field("state", &self.inner.current_state())
            .finish()
    }
}

impl Lease {
    pub(crate) fn from_inner(inner: Arc<LeaseInner>) -> Self {
        Self { inner }
    }

    /// Unique lease identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Identifier of the client that granted the lease.
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Time-to-live the lease is renewed with.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Deadline of the last successful renewal (Unix ms).
    pub fn deadline_ms(&self) -> u64 {
        self.inner.deadline_ms()
    }

    /// Current state. A lease whose deadline passed reports `Expired`
    /// even before the renewal task notices.
    pub fn state(&self) -> LeaseState {
        let state = self.inner.current_state();
        if state == LeaseState::Active && is_lease_expired(self.inner.deadline_ms(), now_unix_ms()) {
            self.inner.mark_expired("deadline passed without renewal");
            return LeaseState::Expired;
        }
        state
    }

    /// Returns true while the lease is active.
    pub fn is_active(&self) -> bool {
        self.state() == LeaseState::Active
    }

    /// Watch lease state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.inner.state.subscribe()
    }

    /// Fail with [`AtomaError::LeaseNotActive`] unless the lease is active.
    pub fn ensure_active(&self) -> Result<()> {
        match self.state() {
            LeaseState::Active => Ok(()),
            state => Err(AtomaError::LeaseNotActive {
                lease_id: self.inner.id.clone(),
                state,
            }),
        }
    }

    /// Read-write lock on `resource`, scoped to this lease.
    ///
    /// No store I/O happens until the lock is used.
    pub fn read_write_lock(&self, resource: impl Into<String>) -> Result<ReadWriteLock> {
        let resource = resource.into();
        validate_resource_id("lock", &resource)?;
        self.ensure_active()?;
        Ok(ReadWriteLock::new(self.clone(), resource))
    }

    /// Cyclic barrier `id` for `parties` parties, scoped to this lease.
    ///
    /// Creates the barrier record on first use. Fails with
    /// [`AtomaError::BarrierConfigMismatch`] if the barrier already exists with
    /// a different party count.
    pub async fn cyclic_barrier(&self, id: impl Into<String>, parties: u32) -> Result<CyclicBarrier> {
        let id = id.into();
        validate_resource_id("barrier", &id)?;
        self.ensure_active()?;
        CyclicBarrier::resolve(self.clone(), id, parties).await
    }

    /// Close the lease.
    ///
    /// Stops renewal, releases every hold, pending entry, barrier arrival and
    /// barrier membership made under this lease, then deletes the lease record.
    /// Cleanup is best-effort: whatever cannot be removed now is pruned by
    /// other contenders once the lease record is gone. Idempotent.
    pub async fn close(&self) {
        if self.inner.state.send_replace(LeaseState::Closed) == LeaseState::Closed {
            return;
        }
        self.inner.renewal.cancel();

        let touched = std::mem::take(&mut *self.inner.touched.lock());
        let own: BTreeSet<String> = [self.inner.id.clone()].into();
        for (key, kind) in touched {
            let result = match kind {
                RecordKind::Resource => self.evict_from::<ResourceRecord>(&key, &own).await,
                RecordKind::Barrier => self.evict_from::<BarrierRecord>(&key, &own).await,
            };
            if let Err(e) = result {
                warn!(lease_id = %self.inner.id, key, error = %e, "failed to release entries on lease close");
            }
        }

        let key = lease_key(&self.inner.id);
        match self.inner.queue.store().delete(&key).await {
            Ok(_) => info!(lease_id = %self.inner.id, "lease closed"),
            Err(e) => warn!(lease_id = %self.inner.id, error = %e, "failed to delete lease record"),
        }
    }

    async fn evict_from<R: ContentionRecord>(&self, key: &str, own: &BTreeSet<String>) -> Result<()> {
        self.inner
            .queue
            .transition(key, "close lease", |current: Option<R>| {
                let next = current.and_then(|mut record| record.evict_leases(own).then_some(record));
                Ok((next, ()))
            })
            .await
    }

    /// Remember that `key` may hold entries of this lease.
    pub(crate) fn track(&self, key: &str, kind: RecordKind) {
        self.inner.touched.lock().entry(key.to_string()).or_insert(kind);
    }

    pub(crate) fn queue(&self) -> &ContentionQueue {
        &self.inner.queue
    }
}
