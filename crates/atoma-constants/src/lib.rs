//! Centralized constants for Atoma coordination primitives.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.
//!
//! # Modules
//!
//! - [`coordination`]: Lease timing, contention backoff, record capacity bounds
//! - [`keys`]: Store key prefixes for every record kind
//!
//! # Usage
//!
//! ```
//! use atoma_constants::coordination::DEFAULT_LEASE_TTL_MS;
//! use atoma_constants::keys::RWLOCK_PREFIX;
//! ```

mod assertions;
pub mod coordination;
pub mod keys;
