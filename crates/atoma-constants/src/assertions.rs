//! Compile-time constant assertions for Tiger Style compliance.
//!
//! Each assertion verifies a relationship between constants that must hold for
//! correct lease and contention behavior.

use super::coordination::*;

// ============================================================================
// Lease Timing
// ============================================================================

const _: () = assert!(MIN_LEASE_TTL_MS > 0);
const _: () = assert!(MIN_LEASE_TTL_MS <= DEFAULT_LEASE_TTL_MS);
const _: () = assert!(DEFAULT_LEASE_TTL_MS <= MAX_LEASE_TTL_MS);

// Renewal must happen strictly before the deadline
const _: () = assert!(DEFAULT_RENEWAL_DIVISOR >= 2);
const _: () = assert!(DEFAULT_RENEWAL_DIVISOR <= MAX_RENEWAL_DIVISOR);

// The shortest lease still renews at a non-zero interval
const _: () = assert!(MIN_LEASE_TTL_MS / MAX_RENEWAL_DIVISOR as u64 > 0);

const _: () = assert!(DEFAULT_LEASE_GRANT_MAX_ATTEMPTS > 0);

// ============================================================================
// Backoff Ordering
// ============================================================================

const _: () = assert!(POLL_INITIAL_BACKOFF_MS > 0);
const _: () = assert!(POLL_INITIAL_BACKOFF_MS <= POLL_MAX_BACKOFF_MS);

// Expired leases must be noticed well within the shortest TTL
const _: () = assert!(POLL_MAX_BACKOFF_MS < MIN_LEASE_TTL_MS);

const _: () = assert!(STORE_RETRY_INITIAL_BACKOFF_MS > 0);
const _: () = assert!(STORE_RETRY_INITIAL_BACKOFF_MS <= STORE_RETRY_MAX_BACKOFF_MS);

const _: () = assert!(MAX_CONSECUTIVE_STORE_FAILURES > 0);
const _: () = assert!(MAX_CAS_RETRIES > 0);
const _: () = assert!(MAX_CAS_RETRIES <= 10_000); // sanity check

// ============================================================================
// Record Capacity
// ============================================================================

const _: () = assert!(MAX_LOCK_HOLDERS > 0);
const _: () = assert!(MAX_PENDING_CONTENDERS > 0);
const _: () = assert!(MAX_BARRIER_PARTIES > 0);
const _: () = assert!(MAX_BARRIER_MEMBERS >= MAX_BARRIER_PARTIES);
const _: () = assert!(MAX_RESOURCE_ID_LEN > 0);
