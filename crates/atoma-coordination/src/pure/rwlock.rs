//! Pure read-write lock grant evaluation.
//!
//! Fairness is writer-preferring with reader batching:
//!
//! - A read request is grantable when no other identity holds the write lock
//!   and no write request was enqueued before it. An un-enqueued request sits
//!   at the tail, so any pending writer blocks it.
//! - A write request is grantable when nobody holds the lock and it is at the
//!   head of the pending queue (or the queue is empty and it was never
//!   enqueued).
//! - An identity re-acquiring a mode it holds reenters immediately, and an
//!   identity holding the write lock may take the read lock without queueing.
//!   Holding only the read lock does not let an identity skip ahead for the
//!   write lock.
//!
//! # Tiger Style
//!
//! - Deterministic behavior for testing and verification
//! - Expired entries are pruned by the caller before evaluation

use crate::rwlock::ResourceRecord;
use crate::types::ContenderId;
use crate::types::LockMode;

/// RWLock key prefix.
pub use atoma_constants::keys::RWLOCK_PREFIX;

/// Generate the key for a lock resource.
///
/// ```
/// use atoma_coordination::pure::rwlock::rwlock_key;
///
/// assert_eq!(rwlock_key("orders"), "__atoma:rwlock:orders");
/// ```
#[inline]
pub fn rwlock_key(resource: &str) -> String {
    format!("{RWLOCK_PREFIX}{resource}")
}

/// Why a request cannot be granted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Another identity holds the write lock.
    WriteHeld,
    /// The lock has holders and a write needs it empty.
    Held,
    /// A write request was enqueued before this read request.
    WriterAhead,
    /// Another request is at the head of the queue.
    NotHeadOfQueue,
}

/// Result of evaluating one request against a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDecision {
    /// The identity already holds this mode; increment its count.
    Reenter,
    /// Add a new hold and drop the identity's pending entry.
    Grant,
    /// Not grantable; keep (or create) a pending entry.
    Wait(BlockReason),
}

/// Evaluate a request of `contender` for `mode` against `record`.
pub fn evaluate_request(record: &ResourceRecord, contender: &ContenderId, mode: LockMode) -> GrantDecision {
    if record.holder(contender, mode).is_some() {
        return GrantDecision::Reenter;
    }

    match mode {
        LockMode::Read => evaluate_read(record, contender),
        LockMode::Write => evaluate_write(record, contender),
    }
}

fn evaluate_read(record: &ResourceRecord, contender: &ContenderId) -> GrantDecision {
    // Downgrade-safe: the writer may read without queueing
    if record.holder(contender, LockMode::Write).is_some() {
        return GrantDecision::Grant;
    }

    if record.holders.iter().any(|h| h.mode == LockMode::Write) {
        return GrantDecision::Wait(BlockReason::WriteHeld);
    }

    let own_ticket = record.pending_entry(contender, LockMode::Read).map(|p| p.ticket);
    let writer_ahead = record
        .pending
        .iter()
        .filter(|p| p.mode == LockMode::Write)
        .any(|p| own_ticket.is_none_or(|own| p.ticket < own));
    if writer_ahead {
        return GrantDecision::Wait(BlockReason::WriterAhead);
    }

    GrantDecision::Grant
}

fn evaluate_write(record: &ResourceRecord, contender: &ContenderId) -> GrantDecision {
    if !record.holders.is_empty() {
        return GrantDecision::Wait(BlockReason::Held);
    }

    match queue_head(record) {
        None => GrantDecision::Grant,
        Some(head) if head.mode == LockMode::Write && head.contender == *contender => GrantDecision::Grant,
        Some(_) => GrantDecision::Wait(BlockReason::NotHeadOfQueue),
    }
}

fn queue_head(record: &ResourceRecord) -> Option<&crate::rwlock::PendingEntry> {
    record.pending.iter().min_by_key(|p| p.ticket)
}
