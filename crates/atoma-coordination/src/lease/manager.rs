//! Lease issuance and renewal.

use std::sync::Arc;
use std::time::Duration;

use atoma_constants::coordination::MAX_LEASE_TTL_MS;
use atoma_constants::coordination::MIN_LEASE_TTL_MS;
use atoma_store::CreateOutcome;
use atoma_store::StoreError;
use atoma_store::WriteOutcome;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use super::Lease;
use super::LeaseInner;
use super::LeaseRecord;
use super::RenewalScheduler;
use crate::contention::Backoff;
use crate::contention::ContentionQueue;
use crate::error::AtomaError;
use crate::error::CorruptedRecordSnafu;
use crate::error::Result;
use crate::pure::lease::compute_lease_deadline;
use crate::pure::lease::is_lease_expired;
use crate::pure::lease::lease_key;
use crate::types::now_unix_ms;

/// Outcome of a single renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenewAttempt {
    /// The deadline was extended.
    Renewed { deadline_ms: u64 },
    /// The lease record is gone.
    Revoked,
    /// The recorded deadline already passed; the lease is not resurrected.
    Expired,
    /// Someone else wrote the record concurrently; retry immediately.
    Conflict,
}

/// Issues leases for one client and owns their renewal scheduler.
pub struct LeaseManager {
    owner: String,
    queue: ContentionQueue,
    scheduler: RenewalScheduler,
}

impl LeaseManager {
    pub(crate) fn new(owner: String, queue: ContentionQueue) -> Self {
        Self {
            owner,
            queue,
            scheduler: RenewalScheduler::new(),
        }
    }

    /// Identifier recorded as the owner of every lease granted here.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Grant a lease with the given TTL and start renewing it.
    ///
    /// The lease record is created with a fresh identity and a deadline of
    /// `now + ttl`. Transient store failures are retried up to
    /// `lease_grant_max_attempts` times before failing with
    /// [`AtomaError::StoreUnavailable`].
    pub async fn grant(&self, ttl: Duration) -> Result<Lease> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if !(MIN_LEASE_TTL_MS..=MAX_LEASE_TTL_MS).contains(&ttl_ms) {
            return Err(AtomaError::InvalidArgument {
                reason: format!("lease ttl {ttl_ms}ms outside {MIN_LEASE_TTL_MS}..={MAX_LEASE_TTL_MS}ms"),
            });
        }
        if self.scheduler.is_shut_down() {
            return Err(AtomaError::HandleClosed {
                what: "client".to_string(),
            });
        }

        let max_attempts = self.queue.config().lease_grant_max_attempts;
        let mut backoff = Backoff::new(
            self.queue.config().store_retry_initial_backoff_ms,
            self.queue.config().store_retry_max_backoff_ms,
        );
        let mut attempt = 0u32;

        let record = loop {
            attempt += 1;
            match self.try_create(ttl_ms).await? {
                Ok(Some(record)) => break record,
                // Identifier collision, draw another one
                Ok(None) => continue,
                Err(e) if attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "lease grant failed, retrying");
                    tokio::time::sleep(backoff.next_sleep()).await;
                }
                Err(e) => {
                    return Err(e).context(crate::error::StoreUnavailableSnafu {
                        operation: "grant lease",
                        attempts: attempt,
                    });
                }
            }
        };

        let inner = Arc::new(LeaseInner::new(&record, self.queue.clone(), self.scheduler.child_token()));
        self.scheduler.schedule(inner.clone());
        info!(lease_id = %record.lease_id, ttl_ms, owner = %self.owner, "lease granted");

        Ok(Lease::from_inner(inner))
    }

    /// Create a lease record. `Ok(Ok(None))` means the identifier was taken.
    async fn try_create(&self, ttl_ms: u64) -> Result<Result<Option<LeaseRecord>, StoreError>> {
        let now_ms = now_unix_ms();
        let record = LeaseRecord {
            lease_id: Uuid::new_v4().to_string(),
            owner: self.owner.clone(),
            ttl_ms,
            granted_at_ms: now_ms,
            renewed_at_ms: now_ms,
            deadline_ms: compute_lease_deadline(now_ms, ttl_ms),
        };
        let key = lease_key(&record.lease_id);
        let value = serde_json::to_string(&record).context(CorruptedRecordSnafu { key: key.clone() })?;

        Ok(match self.queue.store().create_if_absent(&key, value).await {
            Ok(CreateOutcome::Created { .. }) => Ok(Some(record)),
            Ok(CreateOutcome::AlreadyExists) => Ok(None),
            Err(e) => Err(e),
        })
    }

    /// Stop renewing every lease and wait for the renewal tasks to finish.
    ///
    /// Leases are not closed; their records expire with their TTL.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// Extend the deadline of `lease` once.
pub(crate) async fn renew_once(lease: &LeaseInner) -> Result<RenewAttempt, StoreError> {
    let key = lease_key(lease.id());
    let store = lease.queue().store();

    let Some(current) = store.read_record(&key).await? else {
        return Ok(RenewAttempt::Revoked);
    };
    let record: LeaseRecord = match serde_json::from_str(&current.value) {
        Ok(record) => record,
        Err(e) => {
            warn!(lease_id = lease.id(), error = %e, "unreadable lease record, treating as revoked");
            return Ok(RenewAttempt::Revoked);
        }
    };

    let now_ms = now_unix_ms();
    if is_lease_expired(record.deadline_ms, now_ms) {
        return Ok(RenewAttempt::Expired);
    }

    let renewed = record.renewed(now_ms);
    let value = match serde_json::to_string(&renewed) {
        Ok(value) => value,
        Err(e) => {
            warn!(lease_id = lease.id(), error = %e, "failed to encode lease record");
            return Ok(RenewAttempt::Revoked);
        }
    };

    match store.write_if_version(&key, current.version, value).await? {
        WriteOutcome::Written { .. } => {
            lease.set_deadline_ms(renewed.deadline_ms);
            debug!(lease_id = lease.id(), deadline_ms = renewed.deadline_ms, "lease renewed");
            Ok(RenewAttempt::Renewed {
                deadline_ms: renewed.deadline_ms,
            })
        }
        WriteOutcome::Conflict => Ok(RenewAttempt::Conflict),
    }
}
