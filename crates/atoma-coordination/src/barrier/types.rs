//! Cyclic barrier record types.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::contention::ContentionRecord;
use crate::types::ContenderId;

/// One party waiting in the current generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrival {
    /// Identity of the waiting party.
    pub contender: ContenderId,
    /// Arrival time (ms since epoch).
    pub arrived_at_ms: u64,
}

/// A live barrier handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Lease the handle was resolved under.
    pub lease_id: String,
    /// Handle identifier.
    pub handle_id: String,
    /// Resolution time (ms since epoch).
    pub joined_at_ms: u64,
}

/// Barrier state stored in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierRecord {
    /// Barrier identifier.
    pub barrier_id: String,
    /// Number of parties required to trip the barrier. Never changes.
    pub parties: u32,
    /// Number of times the barrier has tripped.
    pub generation: u64,
    /// Arrivals of the current generation, in arrival order.
    pub arrived: Vec<Arrival>,
    /// Live handles.
    pub members: Vec<Member>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u64,
}

impl BarrierRecord {
    /// Create a barrier in generation 0 with no arrivals.
    pub fn new(barrier_id: &str, parties: u32, now_ms: u64) -> Self {
        debug_assert!(parties > 0, "BARRIER: parties must be positive");
        Self {
            barrier_id: barrier_id.to_string(),
            parties,
            generation: 0,
            arrived: Vec::new(),
            members: Vec::new(),
            created_at_ms: now_ms,
        }
    }

    /// Number of parties currently waiting.
    pub fn waiting(&self) -> u32 {
        self.arrived.len() as u32
    }

    /// Position of `contender` among the current arrivals.
    pub fn arrival_position(&self, contender: &ContenderId) -> Option<usize> {
        self.arrived.iter().position(|a| a.contender == *contender)
    }

    /// Register a handle. Returns false if it was already a member.
    pub fn join(&mut self, lease_id: &str, handle_id: &str, now_ms: u64) -> bool {
        if self.members.iter().any(|m| m.handle_id == handle_id) {
            return false;
        }
        self.members.push(Member {
            lease_id: lease_id.to_string(),
            handle_id: handle_id.to_string(),
            joined_at_ms: now_ms,
        });
        true
    }

    /// Remove a handle's membership and any arrival made through it.
    /// Returns whether anything changed.
    pub fn leave(&mut self, handle_id: &str) -> bool {
        let before = self.members.len() + self.arrived.len();
        self.members.retain(|m| m.handle_id != handle_id);
        self.arrived.retain(|a| a.contender.handle_id != handle_id);
        self.members.len() + self.arrived.len() != before
    }

    /// Advance to the next generation and clear arrivals.
    pub fn trip(&mut self) {
        self.generation = self.generation.saturating_add(1);
        self.arrived.clear();
    }
}

impl ContentionRecord for BarrierRecord {
    fn lease_ids(&self) -> BTreeSet<String> {
        self.arrived
            .iter()
            .map(|a| &a.contender.lease_id)
            .chain(self.members.iter().map(|m| &m.lease_id))
            .cloned()
            .collect()
    }

    fn evict_leases(&mut self, leases: &BTreeSet<String>) -> bool {
        let before = self.members.len() + self.arrived.len();
        self.arrived.retain(|a| !leases.contains(&a.contender.lease_id));
        self.members.retain(|m| !leases.contains(&m.lease_id));
        self.members.len() + self.arrived.len() != before
    }
}
