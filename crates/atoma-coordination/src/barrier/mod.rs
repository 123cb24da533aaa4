//! Distributed cyclic barrier.
//!
//! A barrier lets a fixed number of parties wait for each other. Every party
//! that calls [`CyclicBarrier::wait`] is registered as an arrival of the
//! current generation; the arrival that completes the set advances the
//! generation and clears the arrivals, which releases everyone who arrived in
//! the finished generation. The barrier is then ready for the next round.
//!
//! The party count is fixed when the barrier record is first created. Every
//! later resolution must ask for the same count.
//!
//! The barrier is stored as a JSON object in the coordination store.

mod arrival;
mod types;

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use atoma_constants::coordination::MAX_BARRIER_MEMBERS;
use atoma_constants::coordination::MAX_BARRIER_PARTIES;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use self::arrival::BarrierArrival;
pub use self::types::Arrival;
pub use self::types::BarrierRecord;
pub use self::types::Member;
use crate::contention::WaitBound;
use crate::error::AtomaError;
use crate::error::Result;
use crate::lease::Lease;
use crate::lease::RecordKind;
use crate::pure::barrier::barrier_key;
use crate::types::ContenderId;
use crate::types::now_unix_ms;

/// A cyclic barrier handle, scoped to a lease.
pub struct CyclicBarrier {
    lease: Lease,
    id: String,
    key: String,
    parties: u32,
    handle_id: String,
    closed: AtomicBool,
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("id", &self.id)
            .field("parties", &self.parties)
            .field("lease_id", &self.lease.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CyclicBarrier {
    /// Create the barrier record or join the existing one.
    pub(crate) async fn resolve(lease: Lease, id: String, parties: u32) -> Result<Self> {
        if parties == 0 || parties > MAX_BARRIER_PARTIES {
            return Err(AtomaError::InvalidArgument {
                reason: format!("barrier parties {parties} outside 1..={MAX_BARRIER_PARTIES}"),
            });
        }

        let key = barrier_key(&id);
        let handle_id = Uuid::new_v4().to_string();
        lease.track(&key, RecordKind::Barrier);

        lease
            .queue()
            .transition(&key, "resolve barrier", |current: Option<BarrierRecord>| {
                let now_ms = now_unix_ms();
                let mut record = current.unwrap_or_else(|| BarrierRecord::new(&id, parties, now_ms));
                if record.parties != parties {
                    return Err(AtomaError::BarrierConfigMismatch {
                        barrier: id.clone(),
                        existing: record.parties,
                        requested: parties,
                    });
                }
                if record.members.len() as u64 >= u64::from(MAX_BARRIER_MEMBERS) {
                    return Err(AtomaError::CapacityExceeded {
                        key: key.clone(),
                        what: "barrier members",
                        count: record.members.len() as u32,
                        max: MAX_BARRIER_MEMBERS,
                    });
                }
                record.join(lease.id(), &handle_id, now_ms);
                Ok((Some(record), ()))
            })
            .await?;

        debug!(barrier = %id, parties, lease_id = lease.id(), "barrier resolved");

        Ok(Self {
            lease,
            id,
            key,
            parties,
            handle_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Barrier identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of parties required to trip the barrier.
    pub fn parties(&self) -> u32 {
        self.parties
    }

    /// Wait until all parties have arrived.
    ///
    /// Returns the arrival index: `parties - 1` for the first party to arrive,
    /// `0` for the one that tripped the barrier.
    pub async fn wait(&self) -> Result<u32> {
        self.arrive(WaitBound::default()).await
    }

    /// Wait at most `timeout` for all parties.
    ///
    /// On timeout the arrival is withdrawn, unless the barrier tripped first.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<u32> {
        self.arrive(WaitBound {
            timeout: Some(timeout),
            cancel: None,
        })
        .await
    }

    /// Wait for all parties until `cancel` fires.
    pub async fn wait_interruptibly(&self, cancel: &CancellationToken) -> Result<u32> {
        self.arrive(WaitBound {
            timeout: None,
            cancel: Some(cancel),
        })
        .await
    }

    async fn arrive(&self, bound: WaitBound<'_>) -> Result<u32> {
        self.ensure_open()?;
        self.lease.ensure_active()?;

        let contender = ContenderId::current(self.lease.id(), &self.handle_id);
        let arrival = BarrierArrival::new(&self.id, self.parties, contender);
        let index = self.lease.queue().run(&self.key, arrival, &self.lease, bound).await?;

        debug!(barrier = %self.id, index, "barrier passed");
        Ok(index)
    }

    /// Number of parties currently waiting.
    pub async fn number_waiting(&self) -> Result<u32> {
        Ok(self.load().await?.map(|r| r.waiting()).unwrap_or(0))
    }

    /// Number of times the barrier has tripped.
    pub async fn generation(&self) -> Result<u64> {
        Ok(self.load().await?.map(|r| r.generation).unwrap_or(0))
    }

    async fn load(&self) -> Result<Option<BarrierRecord>> {
        let loaded = self.lease.queue().load::<BarrierRecord>(&self.key).await?;
        Ok(loaded.map(|(record, _)| record))
    }

    /// Whether this handle was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Leave the barrier: drop this handle's membership and pending arrival.
    ///
    /// The party count is left as is. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handle_id = &self.handle_id;
        self.lease
            .queue()
            .transition(&self.key, "close barrier", |current: Option<BarrierRecord>| {
                let next = current.and_then(|mut record| record.leave(handle_id).then_some(record));
                Ok((next, ()))
            })
            .await?;

        debug!(barrier = %self.id, "barrier handle closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AtomaError::HandleClosed {
                what: format!("barrier '{}'", self.id),
            });
        }
        Ok(())
    }
}
