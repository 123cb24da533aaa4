//! Atoma: distributed reentrant read-write locks and cyclic barriers.
//!
//! Independent processes coordinate through a shared [`CoordinationStore`]
//! that offers versioned compare-and-swap writes. Every lock hold and barrier
//! arrival is scoped to a [`Lease`] renewed in the background; when a process
//! dies its lease expires and whatever it held is released for everyone else.
//!
//! # Crates
//!
//! - [`atoma_store`]: the store abstraction and an in-memory implementation
//! - [`atoma_coordination`]: leases, locks, barriers and the client
//! - [`atoma_constants`]: timing defaults and capacity bounds

pub use atoma_constants as constants;
pub use atoma_coordination::*;
pub use atoma_store::CoordinationStore;
pub use atoma_store::CreateOutcome;
pub use atoma_store::InMemoryCoordinationStore;
pub use atoma_store::StoreError;
pub use atoma_store::VersionedRecord;
pub use atoma_store::WriteOutcome;
