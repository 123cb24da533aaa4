use serde::Deserialize;
use serde::Serialize;

/// Lease record stored in the coordination store.
///
/// Other contenders read `deadline_ms` to decide whether entries attributed to
/// this lease still count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Unique lease identifier.
    pub lease_id: String,
    /// Identifier of the client that granted the lease.
    pub owner: String,
    /// TTL in milliseconds.
    pub ttl_ms: u64,
    /// When the lease was granted (Unix ms).
    pub granted_at_ms: u64,
    /// When the lease was last renewed (Unix ms).
    pub renewed_at_ms: u64,
    /// The lease is void after this instant (Unix ms).
    pub deadline_ms: u64,
}

impl LeaseRecord {
    /// A copy extended to `now_ms + ttl_ms`.
    pub fn renewed(&self, now_ms: u64) -> Self {
        Self {
            renewed_at_ms: now_ms,
            deadline_ms: crate::pure::lease::compute_lease_deadline(now_ms, self.ttl_ms),
            ..self.clone()
        }
    }
}
