//! Store key prefixes.
//!
//! Every record Atoma writes lives under one of these prefixes so the
//! coordination keyspace never collides with application data sharing the
//! same store.

/// Prefix of lease records (`__atoma:lease:<lease_id>`).
pub const LEASE_PREFIX: &str = "__atoma:lease:";

/// Prefix of read-write lock resource records (`__atoma:rwlock:<resource>`).
pub const RWLOCK_PREFIX: &str = "__atoma:rwlock:";

/// Prefix of cyclic barrier records (`__atoma:barrier:<id>`).
pub const BARRIER_PREFIX: &str = "__atoma:barrier:";
