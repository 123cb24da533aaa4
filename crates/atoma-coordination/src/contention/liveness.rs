//! Lease liveness checks for crash recovery.
//!
//! An entry attributed to a lease whose record is missing or past its deadline
//! is treated as released. Deadlines only move forward while a lease lives, so
//! a deadline observed once stays valid until it passes and the record only
//! needs to be read again after that.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use atoma_store::CoordinationStore;
use atoma_store::StoreError;
use tracing::warn;

use crate::lease::LeaseRecord;
use crate::pure::lease::is_lease_expired;
use crate::pure::lease::lease_key;

/// Per-operation cache of observed lease deadlines.
pub(crate) struct LeaseLiveness {
    store: Arc<dyn CoordinationStore>,
    deadlines: HashMap<String, u64>,
}

impl LeaseLiveness {
    pub(crate) fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            deadlines: HashMap::new(),
        }
    }

    /// The subset of `lease_ids` that are no longer alive at `now_ms`.
    pub(crate) async fn dead_among(
        &mut self,
        lease_ids: &BTreeSet<String>,
        now_ms: u64,
    ) -> Result<BTreeSet<String>, StoreError> {
        let mut dead = BTreeSet::new();

        for lease_id in lease_ids {
            if let Some(&deadline_ms) = self.deadlines.get(lease_id)
                && !is_lease_expired(deadline_ms, now_ms)
            {
                continue;
            }

            match self.read_deadline(lease_id).await? {
                Some(deadline_ms) if !is_lease_expired(deadline_ms, now_ms) => {
                    self.deadlines.insert(lease_id.clone(), deadline_ms);
                }
                _ => {
                    self.deadlines.remove(lease_id);
                    dead.insert(lease_id.clone());
                }
            }
        }

        Ok(dead)
    }

    async fn read_deadline(&self, lease_id: &str) -> Result<Option<u64>, StoreError> {
        let key = lease_key(lease_id);
        let Some(record) = self.store.read_record(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<LeaseRecord>(&record.value) {
            Ok(lease) => Ok(Some(lease.deadline_ms)),
            Err(e) => {
                warn!(lease_id, error = %e, "unreadable lease record, treating lease as dead");
                Ok(None)
            }
        }
    }
}
