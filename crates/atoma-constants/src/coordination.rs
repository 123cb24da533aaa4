//! Coordination constants: lease timing, backoff, and record capacity.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Lease Timing
// ============================================================================

/// Default lease TTL when the caller does not choose one (30 seconds).
pub const DEFAULT_LEASE_TTL_MS: u64 = 30_000;

/// Smallest TTL a lease may be granted with (300 ms).
///
/// Tiger Style: A TTL below this leaves no room for a renewal round trip
/// before the deadline passes.
pub const MIN_LEASE_TTL_MS: u64 = 300;

/// Largest TTL a lease may be granted with (1 hour).
pub const MAX_LEASE_TTL_MS: u64 = 60 * 60 * 1000;

/// Renewal runs every `ttl / DEFAULT_RENEWAL_DIVISOR`.
pub const DEFAULT_RENEWAL_DIVISOR: u32 = 3;

/// Upper bound on the configurable renewal divisor.
pub const MAX_RENEWAL_DIVISOR: u32 = 10;

/// Maximum attempts to write a new lease record before giving up.
pub const DEFAULT_LEASE_GRANT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Contention Backoff
// ============================================================================

/// Initial wait between grant evaluations of a blocked contender (10 ms).
pub const POLL_INITIAL_BACKOFF_MS: u64 = 10;

/// Cap on the wait between grant evaluations (200 ms).
///
/// Tiger Style: Also bounds how late a waiter notices an expired lease,
/// since lease expiry produces no record change.
pub const POLL_MAX_BACKOFF_MS: u64 = 200;

/// Initial backoff after a transient store failure (20 ms).
pub const STORE_RETRY_INITIAL_BACKOFF_MS: u64 = 20;

/// Cap on the backoff after transient store failures (1 second).
pub const STORE_RETRY_MAX_BACKOFF_MS: u64 = 1_000;

/// Consecutive store failures tolerated before surfacing unavailability.
pub const MAX_CONSECUTIVE_STORE_FAILURES: u32 = 10;

/// Maximum immediate retries of a version-checked write on conflict.
///
/// Tiger Style: Conflicts mean progress by someone else, but a livelocked
/// loop must still terminate.
pub const MAX_CAS_RETRIES: u32 = 1_000;

// ============================================================================
// Record Capacity
// ============================================================================

/// Maximum concurrent holder entries on one lock resource.
pub const MAX_LOCK_HOLDERS: u32 = 1_024;

/// Maximum pending entries on one lock resource.
pub const MAX_PENDING_CONTENDERS: u32 = 1_024;

/// Maximum parties of a cyclic barrier.
pub const MAX_BARRIER_PARTIES: u32 = 10_000;

/// Maximum member handles registered on one barrier.
pub const MAX_BARRIER_MEMBERS: u32 = 10_000;

/// Maximum length of a lock resource or barrier identifier in bytes.
pub const MAX_RESOURCE_ID_LEN: usize = 512;
