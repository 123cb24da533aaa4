//! Lease-scoped distributed coordination primitives built on CAS operations.
//!
//! This crate provides coordination primitives for independent processes
//! sharing one [`atoma_store::CoordinationStore`]:
//!
//! - `Lease` - Liveness anchor renewed in the background; everything held under a lease is released when it
//!   expires or is closed
//! - `ReadWriteLock` - Reentrant read-write lock with writer preference
//! - `CyclicBarrier` - Reusable rendezvous of a fixed number of parties
//!
//! Every state change is a version-checked write of a single record, retried on
//! conflict. There is no coordinator process and no message passing; waiters
//! watch the record they are interested in.
//!
//! ## Lock Example
//!
//! ```ignore
//! use atoma_coordination::AtomaClient;
//! use atoma_store::InMemoryCoordinationStore;
//!
//! let client = AtomaClient::new(InMemoryCoordinationStore::new());
//! let lease = client.grant_lease(Duration::from_secs(10)).await?;
//! let rwlock = lease.read_write_lock("inventory")?;
//!
//! let write = rwlock.write_lock();
//! write.lock().await?;
//! // Exclusive section
//! write.unlock().await?;
//!
//! client.close().await;
//! ```
//!
//! ## Barrier Example
//!
//! ```ignore
//! let barrier = lease.cyclic_barrier("phase-1", 3).await?;
//! let index = barrier.wait().await?;
//! if index == 0 {
//!     // Last to arrive
//! }
//! ```

mod barrier;
mod client;
mod config;
mod contention;
mod error;
mod lease;
pub mod pure;
mod rwlock;
mod types;

pub use barrier::Arrival;
pub use barrier::BarrierRecord;
pub use barrier::CyclicBarrier;
pub use barrier::Member;
pub use client::AtomaClient;
pub use config::AtomaConfig;
pub use config::ConfigError;
pub use contention::ContentionRecord;
pub use error::AtomaError;
pub use error::Result;
pub use lease::Lease;
pub use lease::LeaseManager;
pub use lease::LeaseRecord;
pub use lease::LeaseState;
pub use rwlock::HolderEntry;
pub use rwlock::Lock;
pub use rwlock::PendingEntry;
pub use rwlock::ReadWriteLock;
pub use rwlock::ReleaseOutcome;
pub use rwlock::ResourceRecord;
pub use tokio_util::sync::CancellationToken;
pub use types::ContenderId;
pub use types::LockMode;
pub use types::current_task_key;
pub use types::now_unix_ms;
