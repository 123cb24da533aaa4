//! Distributed reentrant read-write lock.
//!
//! A [`ReadWriteLock`] names one resource under one lease. Its read and write
//! sides are [`Lock`] handles sharing a single identity per calling task, so a
//! task holding the write lock can take the read lock too.
//!
//! ## Fairness
//!
//! Writer preference with reader batching: a read request is blocked by any
//! write request enqueued before it, writers are served FIFO by ticket, and
//! readers enqueued between two writers are all admitted together. See
//! [`crate::pure::rwlock`] for the exact rules.
//!
//! ## Ownership
//!
//! Holds belong to the task that acquired them. Releasing from another task
//! fails with [`AtomaError::IllegalMonitorState`](crate::AtomaError::IllegalMonitorState).
//! Ownership is keyed by tokio task id, so futures polled together inside one
//! task (`join!`, `select!`) count as one owner: through the same handle they
//! reenter each other's write hold instead of excluding each other. Spawn a
//! task per concurrent critical section.
//! Write is not an upgrade of read: a task holding only the read lock that
//! asks for the write lock waits for its own read hold like any other writer.

mod acquisition;
mod release;
mod types;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use uuid::Uuid;

pub use self::types::HolderEntry;
pub use self::types::PendingEntry;
pub use self::types::ReleaseOutcome;
pub use self::types::ResourceRecord;
use crate::error::AtomaError;
use crate::error::Result;
use crate::lease::Lease;
use crate::pure::rwlock::rwlock_key;
use crate::types::ContenderId;
use crate::types::LockMode;
use crate::types::current_task_key;

struct LockShared {
    lease: Lease,
    resource: String,
    key: String,
    handle_id: String,
    /// Hold counts of this handle per (task, mode), mirroring the store.
    holds: Mutex<HashMap<(String, LockMode), u32>>,
}

impl LockShared {
    fn contender(&self) -> ContenderId {
        ContenderId::current(self.lease.id(), &self.handle_id)
    }

    fn hold_count(&self, task: &str, mode: LockMode) -> u32 {
        self.holds.lock().get(&(task.to_string(), mode)).copied().unwrap_or(0)
    }

    fn record_acquired(&self, task: String, mode: LockMode) {
        let mut holds = self.holds.lock();
        let count = holds.entry((task, mode)).or_insert(0);
        *count = count.saturating_add(1);
    }

    fn record_released(&self, task: &str, mode: LockMode) {
        let mut holds = self.holds.lock();
        let key = (task.to_string(), mode);
        if let Some(count) = holds.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                holds.remove(&key);
            }
        }
    }

    fn forget(&self, task: &str, mode: LockMode) {
        self.holds.lock().remove(&(task.to_string(), mode));
    }
}

/// A read-write lock on one resource, scoped to a lease.
///
/// Cheap to clone; clones are the same handle and share identity.
#[derive(Clone)]
pub struct ReadWriteLock {
    shared: Arc<LockShared>,
}

impl fmt::Debug for ReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteLock")
            .field("resource", &self.shared.resource)
            .field("lease_id", &self.shared.lease.id())
            .field("handle_id", &self.shared.handle_id)
            .finish()
    }
}

impl ReadWriteLock {
    pub(crate) fn new(lease: Lease, resource: String) -> Self {
        Self {
            shared: Arc::new(LockShared {
                key: rwlock_key(&resource),
                lease,
                resource,
                handle_id: Uuid::new_v4().to_string(),
                holds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The shared side.
    pub fn read_lock(&self) -> Lock {
        Lock::new(self.shared.clone(), LockMode::Read)
    }

    /// The exclusive side.
    pub fn write_lock(&self) -> Lock {
        Lock::new(self.shared.clone(), LockMode::Write)
    }

    /// Resource identifier.
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    /// The lease this lock is scoped to.
    pub fn lease(&self) -> &Lease {
        &self.shared.lease
    }
}

/// One side of a [`ReadWriteLock`].
///
/// `lock`/`unlock` pairs are counted per task: a task that locked three times
/// must unlock three times before others can get in.
pub struct Lock {
    shared: Arc<LockShared>,
    mode: LockMode,
    closed: AtomicBool,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("resource", &self.shared.resource)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Lock {
    fn new(shared: Arc<LockShared>, mode: LockMode) -> Self {
        Self {
            shared,
            mode,
            closed: AtomicBool::new(false),
        }
    }

    /// Mode of this side.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Resource identifier.
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    /// How many times the calling task holds this side.
    pub fn hold_count(&self) -> u32 {
        self.shared.hold_count(&current_task_key(), self.mode)
    }

    /// Whether this handle was closed. Says nothing about lock possession.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Dispose of this handle. Holds stay in place until unlocked through
    /// another handle of the same lock or released with the lease.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AtomaError::HandleClosed {
                what: format!("{} lock '{}'", self.mode, self.shared.resource),
            });
        }
        Ok(())
    }
}
