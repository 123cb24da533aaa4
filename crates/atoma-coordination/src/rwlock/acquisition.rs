//! Read and write lock acquisition logic.

use std::time::Duration;

use atoma_constants::coordination::MAX_LOCK_HOLDERS;
use atoma_constants::coordination::MAX_PENDING_CONTENDERS;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Lock;
use super::types::ResourceRecord;
use crate::contention::AttemptContext;
use crate::contention::Contender;
use crate::contention::Step;
use crate::contention::WaitBound;
use crate::error::AtomaError;
use crate::error::Result;
use crate::lease::RecordKind;
use crate::pure::rwlock::GrantDecision;
use crate::pure::rwlock::evaluate_request;
use crate::types::ContenderId;
use crate::types::LockMode;

/// A pending lock request driven by the contention queue.
#[derive(Debug, Clone)]
pub(crate) struct LockRequest {
    resource: String,
    contender: ContenderId,
    mode: LockMode,
    /// Local hold count of the calling task when the acquisition started.
    held_before: u32,
}

impl LockRequest {
    fn check_capacity(&self, record: &ResourceRecord, what: &'static str, count: usize, max: u32) -> Result<()> {
        if count as u64 >= u64::from(max) {
            return Err(AtomaError::CapacityExceeded {
                key: record.resource.clone(),
                what,
                count: count as u32,
                max,
            });
        }
        Ok(())
    }
}

impl Contender for LockRequest {
    type Record = ResourceRecord;
    type Output = ();

    fn describe(&self) -> String {
        format!("{} lock on '{}'", self.mode, self.resource)
    }

    fn evaluate(&self, current: Option<ResourceRecord>, ctx: &AttemptContext) -> Result<Step<ResourceRecord, ()>> {
        let mut record = current.unwrap_or_else(|| ResourceRecord::new(&self.resource, ctx.now_ms));

        // A write whose acknowledgement was lost already granted this hold
        if record.holder(&self.contender, self.mode).is_some_and(|h| h.count > self.held_before) {
            return Ok(Step::Complete { next: None, output: () });
        }

        match evaluate_request(&record, &self.contender, self.mode) {
            GrantDecision::Reenter => {
                record.reenter(&self.contender, self.mode);
                Ok(Step::Complete {
                    next: Some(record),
                    output: (),
                })
            }
            GrantDecision::Grant => {
                self.check_capacity(&record, "lock holders", record.holders.len(), MAX_LOCK_HOLDERS)?;
                record.grant(&self.contender, self.mode, ctx.now_ms);
                Ok(Step::Complete {
                    next: Some(record),
                    output: (),
                })
            }
            GrantDecision::Wait(reason) => {
                if !ctx.may_enqueue || record.pending_entry(&self.contender, self.mode).is_some() {
                    return Ok(Step::Wait { next: None });
                }

                self.check_capacity(&record, "pending contenders", record.pending.len(), MAX_PENDING_CONTENDERS)?;
                let ticket = record.enqueue(&self.contender, self.mode, ctx.now_ms);
                debug!(
                    resource = %self.resource,
                    mode = %self.mode,
                    ticket,
                    blocked_by = ?reason,
                    "lock request enqueued"
                );
                Ok(Step::Wait { next: Some(record) })
            }
        }
    }

    /// Drops the pending entry and rolls back a hold granted by this
    /// acquisition but never reported to the caller.
    fn withdraw(&self, mut current: ResourceRecord) -> Option<ResourceRecord> {
        let withdrawn = current.withdraw(&self.contender, self.mode);
        let rolled_back = current.truncate_hold(&self.contender, self.mode, self.held_before);
        (withdrawn || rolled_back).then_some(current)
    }
}

impl Lock {
    /// Acquire, waiting as long as it takes.
    pub async fn lock(&self) -> Result<()> {
        self.acquire(WaitBound::default()).await
    }

    /// Acquire, waiting at most `timeout`.
    ///
    /// `Duration::ZERO` tries exactly once and never enqueues.
    pub async fn lock_timeout(&self, timeout: Duration) -> Result<()> {
        self.acquire(WaitBound {
            timeout: Some(timeout),
            cancel: None,
        })
        .await
    }

    /// Try once without waiting. Returns false if the lock is not available.
    pub async fn try_lock(&self) -> Result<bool> {
        match self.lock_timeout(Duration::ZERO).await {
            Ok(()) => Ok(true),
            Err(AtomaError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Acquire, waiting until granted or until `cancel` fires.
    ///
    /// A cancelled wait removes its queue entry before returning
    /// [`AtomaError::Cancelled`].
    pub async fn lock_interruptibly(&self, cancel: &CancellationToken) -> Result<()> {
        self.acquire(WaitBound {
            timeout: None,
            cancel: Some(cancel),
        })
        .await
    }

    async fn acquire(&self, bound: WaitBound<'_>) -> Result<()> {
        self.ensure_open()?;
        let shared = &self.shared;
        shared.lease.ensure_active()?;

        let contender = shared.contender();
        let task = contender.task.clone();
        let request = LockRequest {
            resource: shared.resource.clone(),
            held_before: shared.hold_count(&task, self.mode),
            contender,
            mode: self.mode,
        };

        shared.lease.track(&shared.key, RecordKind::Resource);
        shared.lease.queue().run(&shared.key, request, &shared.lease, bound).await?;
        shared.record_acquired(task, self.mode);

        debug!(
            resource = %shared.resource,
            mode = %self.mode,
            lease_id = shared.lease.id(),
            hold_count = self.hold_count(),
            "lock acquired"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(lease: &str, mode: LockMode) -> LockRequest {
        reentrant_request(lease, mode, 0)
    }

    fn reentrant_request(lease: &str, mode: LockMode, held_before: u32) -> LockRequest {
        LockRequest {
            held_before,
            resource: "r".to_string(),
            contender: ContenderId {
                lease_id: lease.to_string(),
                handle_id: "h".to_string(),
                task: "t".to_string(),
            },
            mode,
        }
    }

    fn ctx(may_enqueue: bool) -> AttemptContext {
        AttemptContext {
            now_ms: 1_000,
            may_enqueue,
        }
    }

    #[test]
    fn test_grant_on_missing_record_creates_it() {
        let step = request("a", LockMode::Write).evaluate(None, &ctx(true)).unwrap();
        let Step::Complete { next: Some(record), .. } = step else {
            panic!("expected grant");
        };
        assert_eq!(record.holders.len(), 1);
        assert_eq!(record.created_at_ms, 1_000);
    }

    #[test]
    fn test_blocked_request_enqueues_once() {
        let mut record = ResourceRecord::new("r", 0);
        let holder = request("a", LockMode::Write);
        record.grant(&holder.contender, LockMode::Write, 0);

        let waiter = request("b", LockMode::Write);
        let Step::Wait { next: Some(enqueued) } = waiter.evaluate(Some(record), &ctx(true)).unwrap() else {
            panic!("expected enqueue");
        };
        assert_eq!(enqueued.pending.len(), 1);

        // Already enqueued: nothing to write
        let step = waiter.evaluate(Some(enqueued), &ctx(true)).unwrap();
        assert!(matches!(step, Step::Wait { next: None }));
    }

    #[test]
    fn test_final_attempt_does_not_enqueue() {
        let mut record = ResourceRecord::new("r", 0);
        record.grant(&request("a", LockMode::Read).contender, LockMode::Read, 0);

        let step = request("b", LockMode::Write).evaluate(Some(record), &ctx(false)).unwrap();
        assert!(matches!(step, Step::Wait { next: None }));
    }

    #[test]
    fn test_withdraw_removes_pending_entry() {
        let waiter = request("b", LockMode::Read);
        let mut record = ResourceRecord::new("r", 0);
        record.enqueue(&waiter.contender, LockMode::Read, 0);

        let withdrawn = waiter.withdraw(record).unwrap();
        assert!(withdrawn.pending.is_empty());
        assert!(waiter.withdraw(withdrawn).is_none());
    }

    #[test]
    fn test_pending_capacity_enforced() {
        let mut record = ResourceRecord::new("r", 0);
        record.grant(&request("holder", LockMode::Write).contender, LockMode::Write, 0);
        for i in 0..MAX_PENDING_CONTENDERS {
            record.enqueue(&request(&format!("w{i}"), LockMode::Write).contender, LockMode::Write, 0);
        }

        let err = request("late", LockMode::Write).evaluate(Some(record), &ctx(true)).unwrap_err();
        assert!(matches!(err, AtomaError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_committed_grant_is_not_counted_twice() {
        let first = request("a", LockMode::Write);
        let mut record = ResourceRecord::new("r", 0);
        record.grant(&first.contender, LockMode::Write, 0);

        // Retry after the grant landed but its reply was lost
        let step = first.evaluate(Some(record.clone()), &ctx(true)).unwrap();
        assert!(matches!(step, Step::Complete { next: None, .. }));

        // A genuine reentry from the same task still increments
        let again = reentrant_request("a", LockMode::Write, 1);
        let Step::Complete { next: Some(reentered), .. } = again.evaluate(Some(record), &ctx(true)).unwrap() else {
            panic!("expected reentry");
        };
        assert_eq!(reentered.holder(&again.contender, LockMode::Write).unwrap().count, 2);
    }

    #[test]
    fn test_withdraw_rolls_back_unreported_hold() {
        let abandoned = reentrant_request("a", LockMode::Write, 1);
        let mut record = ResourceRecord::new("r", 0);
        record.grant(&abandoned.contender, LockMode::Write, 0);
        assert!(record.reenter(&abandoned.contender, LockMode::Write));

        let rolled_back = abandoned.withdraw(record).unwrap();
        assert_eq!(rolled_back.holder(&abandoned.contender, LockMode::Write).unwrap().count, 1);
        assert!(abandoned.withdraw(rolled_back.clone()).is_none());

        let fresh = request("a", LockMode::Write);
        let emptied = fresh.withdraw(rolled_back).unwrap();
        assert!(emptied.holders.is_empty());
    }
}
