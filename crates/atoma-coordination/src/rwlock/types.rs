//! Read-write lock record types.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::contention::ContentionRecord;
use crate::types::ContenderId;
use crate::types::LockMode;

/// A granted hold on a lock resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEntry {
    /// Identity holding the lock.
    pub contender: ContenderId,
    /// Mode of the hold.
    pub mode: LockMode,
    /// Reentrancy count, at least 1.
    pub count: u32,
    /// When the hold was first granted (Unix ms).
    pub acquired_at_ms: u64,
}

/// A contender waiting for a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Identity waiting for the lock.
    pub contender: ContenderId,
    /// Requested mode.
    pub mode: LockMode,
    /// FIFO position; smaller tickets were enqueued earlier.
    pub ticket: u64,
    /// When the entry was enqueued (Unix ms).
    pub enqueued_at_ms: u64,
}

/// Outcome of removing one level of a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The hold still has `remaining` levels.
    Decremented {
        /// Levels left after the release.
        remaining: u32,
    },
    /// The last level was released and the holder entry removed.
    Released,
    /// The identity has no hold in this mode.
    NotHeld,
}

/// Lock resource record stored in the coordination store.
///
/// Serialized as JSON for human readability and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource identifier.
    pub resource: String,
    /// Current holds.
    pub holders: Vec<HolderEntry>,
    /// Waiting contenders in enqueue order.
    pub pending: Vec<PendingEntry>,
    /// Ticket handed to the next enqueued contender.
    pub next_ticket: u64,
    /// When the record was created (Unix ms).
    pub created_at_ms: u64,
}

impl ResourceRecord {
    /// Create an empty record.
    pub fn new(resource: &str, now_ms: u64) -> Self {
        Self {
            resource: resource.to_string(),
            holders: Vec::new(),
            pending: Vec::new(),
            next_ticket: 1,
            created_at_ms: now_ms,
        }
    }

    /// The holder entry of `contender` in `mode`, if any.
    pub fn holder(&self, contender: &ContenderId, mode: LockMode) -> Option<&HolderEntry> {
        self.holders.iter().find(|h| h.mode == mode && h.contender == *contender)
    }

    /// The pending entry of `contender` in `mode`, if any.
    pub fn pending_entry(&self, contender: &ContenderId, mode: LockMode) -> Option<&PendingEntry> {
        self.pending.iter().find(|p| p.mode == mode && p.contender == *contender)
    }

    /// Number of holder entries in `mode`.
    pub fn holder_count(&self, mode: LockMode) -> u32 {
        self.holders.iter().filter(|h| h.mode == mode).count() as u32
    }

    /// Append a pending entry unless one exists. Returns the entry's ticket.
    pub fn enqueue(&mut self, contender: &ContenderId, mode: LockMode, now_ms: u64) -> u64 {
        if let Some(existing) = self.pending_entry(contender, mode) {
            return existing.ticket;
        }

        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.saturating_add(1);
        self.pending.push(PendingEntry {
            contender: contender.clone(),
            mode,
            ticket,
            enqueued_at_ms: now_ms,
        });
        ticket
    }

    /// Record a new hold (count 1) and drop the matching pending entry.
    pub fn grant(&mut self, contender: &ContenderId, mode: LockMode, now_ms: u64) {
        self.withdraw(contender, mode);
        if self.reenter(contender, mode) {
            return;
        }
        self.holders.push(HolderEntry {
            contender: contender.clone(),
            mode,
            count: 1,
            acquired_at_ms: now_ms,
        });
    }

    /// Increment an existing hold. Returns false if there is none.
    pub fn reenter(&mut self, contender: &ContenderId, mode: LockMode) -> bool {
        match self.holders.iter_mut().find(|h| h.mode == mode && h.contender == *contender) {
            Some(holder) => {
                holder.count = holder.count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Remove one level of the hold of `contender` in `mode`.
    pub fn release(&mut self, contender: &ContenderId, mode: LockMode) -> ReleaseOutcome {
        let Some(position) = self.holders.iter().position(|h| h.mode == mode && h.contender == *contender) else {
            return ReleaseOutcome::NotHeld;
        };

        let holder = &mut self.holders[position];
        if holder.count > 1 {
            holder.count -= 1;
            return ReleaseOutcome::Decremented {
                remaining: holder.count,
            };
        }

        self.holders.remove(position);
        ReleaseOutcome::Released
    }

    /// Cut the hold of `contender` in `mode` down to `count` levels, removing
    /// it at zero. Returns whether anything changed.
    pub fn truncate_hold(&mut self, contender: &ContenderId, mode: LockMode, count: u32) -> bool {
        let Some(position) = self.holders.iter().position(|h| h.mode == mode && h.contender == *contender) else {
            return false;
        };
        if self.holders[position].count <= count {
            return false;
        }

        if count == 0 {
            self.holders.remove(position);
        } else {
            self.holders[position].count = count;
        }
        true
    }

    /// Drop the pending entry of `contender` in `mode`. Returns whether one existed.
    pub fn withdraw(&mut self, contender: &ContenderId, mode: LockMode) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| !(p.mode == mode && p.contender == *contender));
        self.pending.len() != before
    }
}

impl ContentionRecord for ResourceRecord {
    fn lease_ids(&self) -> BTreeSet<String> {
        self.holders
            .iter()
            .map(|h| &h.contender.lease_id)
            .chain(self.pending.iter().map(|p| &p.contender.lease_id))
            .cloned()
            .collect()
    }

    fn evict_leases(&mut self, leases: &BTreeSet<String>) -> bool {
        let before = self.holders.len() + self.pending.len();
        self.holders.retain(|h| !leases.contains(&h.contender.lease_id));
        self.pending.retain(|p| !leases.contains(&p.contender.lease_id));
        self.holders.len() + self.pending.len() != before
    }
}
