//! Shared types for coordination primitives.

use std::fmt;

use atoma_constants::coordination::MAX_RESOURCE_ID_LEN;
use serde::Deserialize;
use serde::Serialize;

use crate::error::AtomaError;

/// Access mode of a lock request or hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared access, any number of holders.
    Read,
    /// Exclusive access, a single holder.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// Identity under which a lock or barrier entry is recorded.
///
/// Two operations share an identity when they run under the same lease, on
/// the same primitive handle, from the same task. Handles obtained from one
/// [`ReadWriteLock`](crate::ReadWriteLock) (its read and write side) share
/// `handle_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContenderId {
    /// Lease the entry is attributed to.
    pub lease_id: String,
    /// Primitive handle the entry was made through.
    pub handle_id: String,
    /// Task (or thread) that made the request.
    pub task: String,
}

impl ContenderId {
    /// Identity for the calling task on the given lease and handle.
    pub fn current(lease_id: &str, handle_id: &str) -> Self {
        Self {
            lease_id: lease_id.to_string(),
            handle_id: handle_id.to_string(),
            task: current_task_key(),
        }
    }
}

impl fmt::Display for ContenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.lease_id, self.handle_id, self.task)
    }
}

/// Key naming the calling task.
///
/// Uses the tokio task id inside a spawned task and the OS thread id
/// otherwise (for example inside `block_on`).
pub fn current_task_key() -> String {
    match tokio::task::try_id() {
        Some(id) => format!("task-{id}"),
        None => format!("{:?}", std::thread::current().id()),
    }
}

/// Get current time in milliseconds since Unix epoch.
#[inline]
pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reject empty or oversized lock and barrier identifiers.
pub(crate) fn validate_resource_id(kind: &str, id: &str) -> Result<(), AtomaError> {
    if id.is_empty() {
        return Err(AtomaError::InvalidArgument {
            reason: format!("{kind} id must not be empty"),
        });
    }
    if id.len() > MAX_RESOURCE_ID_LEN {
        return Err(AtomaError::InvalidArgument {
            reason: format!("{kind} id is {} bytes (max: {MAX_RESOURCE_ID_LEN})", id.len()),
        });
    }
    Ok(())
}
