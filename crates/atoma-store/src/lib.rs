//! Coordination store abstraction for Atoma.
//!
//! Atoma keeps no durable state of its own. Every lease, lock resource and
//! barrier is a small record in a [`CoordinationStore`], a keyed store that
//! offers optimistic versioning: reads return the record's version, and writes
//! are accepted only when the caller names the version it read.
//!
//! [`InMemoryCoordinationStore`] is a deterministic in-process implementation
//! with per-key change notification and fault injection.

mod error;
mod memory;
mod traits;
mod types;

pub use error::StoreError;
pub use error::UnavailableSnafu;
pub use memory::InMemoryCoordinationStore;
pub use traits::CoordinationStore;
pub use types::CreateOutcome;
pub use types::VersionedRecord;
pub use types::WriteOutcome;
