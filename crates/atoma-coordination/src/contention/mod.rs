//! Contention queue: the shared acquisition algorithm.
//!
//! Locks and barriers both follow the same loop against one keyed record:
//! read it, drop entries of dead leases, let the primitive decide, write the
//! result back with a version check, and wait for the record to change when
//! the primitive is not done yet. Version conflicts restart the attempt
//! immediately; transient store errors back off and count against
//! `max_consecutive_store_failures`; only the caller's timeout bounds the
//! total wait.
//!
//! Every mutation of a coordination record goes through [`ContentionQueue::run`]
//! (waiting operations) or [`ContentionQueue::transition`] (one-shot updates).

mod backoff;
mod liveness;

use std::collections::BTreeSet;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use atoma_constants::coordination::MAX_CAS_RETRIES;
use atoma_store::CoordinationStore;
use atoma_store::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

pub(crate) use self::backoff::Backoff;
use self::liveness::LeaseLiveness;
use crate::config::AtomaConfig;
use crate::error::AtomaError;
use crate::error::CorruptedRecordSnafu;
use crate::error::Result;
use crate::lease::Lease;
use crate::types::now_unix_ms;

/// A coordination record whose entries are attributed to leases.
pub trait ContentionRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Leases referenced by any entry of this record.
    fn lease_ids(&self) -> BTreeSet<String>;

    /// Drop every entry attributed to one of `leases`. Returns whether anything changed.
    fn evict_leases(&mut self, leases: &BTreeSet<String>) -> bool;
}

/// Inputs of one evaluation besides the record itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptContext {
    /// Wall clock at the start of the attempt (Unix ms).
    pub now_ms: u64,
    /// False on the final attempt of a bounded wait; no new entries may be created.
    pub may_enqueue: bool,
}

/// Decision of a contender for one attempt.
#[derive(Debug)]
pub(crate) enum Step<R, T> {
    /// Write `next` (if any); once written the operation completes with `output`.
    Complete { next: Option<R>, output: T },
    /// Write `next` (if any), then wait for the record to change.
    Wait { next: Option<R> },
}

/// One participant of the contention loop.
///
/// `evaluate` must be a pure function of the record and the contender's own
/// state. State that depends on a write having succeeded belongs in
/// `committed`.
pub(crate) trait Contender: Clone + Send + Sync + 'static {
    type Record: ContentionRecord;
    type Output: Send;

    /// Human-readable operation name for logs and errors.
    fn describe(&self) -> String;

    fn evaluate(&self, current: Option<Self::Record>, ctx: &AttemptContext) -> Result<Step<Self::Record, Self::Output>>;

    /// Called after a `Step::Wait` record was written.
    fn committed(&mut self, _written: &Self::Record) {}

    /// Remove this contender's waiting entries. `None` leaves the record as is.
    fn withdraw(&self, current: Self::Record) -> Option<Self::Record>;
}

/// Bounds of a waiting operation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WaitBound<'a> {
    /// `None` waits indefinitely; `Some(Duration::ZERO)` tries once.
    pub timeout: Option<Duration>,
    pub cancel: Option<&'a CancellationToken>,
}

/// Result of a CAS operation on a record.
enum CasResult<T> {
    /// CAS succeeded with the given result
    Success(T),
    /// CAS failed due to concurrent modification, retry needed
    Retry,
}

enum AttemptError {
    Store(StoreError),
    Fatal(AtomaError),
}

impl From<StoreError> for AttemptError {
    fn from(e: StoreError) -> Self {
        AttemptError::Store(e)
    }
}

impl From<AtomaError> for AttemptError {
    fn from(e: AtomaError) -> Self {
        AttemptError::Fatal(e)
    }
}

enum Attempted<T> {
    Complete(T),
    Waiting,
    Conflict,
}

enum Woke {
    Changed,
    Elapsed,
    Cancelled,
}

/// Runs contention loops and one-shot transitions against the store.
#[derive(Clone)]
pub(crate) struct ContentionQueue {
    store: Arc<dyn CoordinationStore>,
    config: Arc<AtomaConfig>,
}

impl ContentionQueue {
    pub(crate) fn new(store: Arc<dyn CoordinationStore>, config: Arc<AtomaConfig>) -> Self {
        Self { store, config }
    }

    pub(crate) fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub(crate) fn config(&self) -> &AtomaConfig {
        &self.config
    }

    fn store_backoff(&self) -> Backoff {
        Backoff::new(self.config.store_retry_initial_backoff_ms, self.config.store_retry_max_backoff_ms)
    }

    /// Read and decode the record under `key`, with its version.
    pub(crate) async fn load<R: ContentionRecord>(&self, key: &str) -> Result<Option<(R, u64)>> {
        let mut backoff = self.store_backoff();
        let mut failures = 0u32;
        loop {
            match self.try_load(key).await {
                Ok(loaded) => return Ok(loaded),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Store(e)) => {
                    failures += 1;
                    self.check_failure_budget("read", failures, e)?;
                    tokio::time::sleep(backoff.next_sleep()).await;
                }
            }
        }
    }

    async fn try_load<R: ContentionRecord>(&self, key: &str) -> Result<Option<(R, u64)>, AttemptError> {
        let Some(record) = self.store.read_record(key).await? else {
            return Ok(None);
        };
        let decoded = serde_json::from_str(&record.value).context(CorruptedRecordSnafu { key })?;
        Ok(Some((decoded, record.version)))
    }

    async fn try_store<R: ContentionRecord>(
        &self,
        key: &str,
        version: Option<u64>,
        record: &R,
    ) -> Result<CasResult<()>, AttemptError> {
        let value = serde_json::to_string(record).context(CorruptedRecordSnafu { key })?;

        let written = match version {
            None => self.store.create_if_absent(key, value).await?.is_created(),
            Some(expected) => self.store.write_if_version(key, expected, value).await?.is_written(),
        };

        Ok(if written { CasResult::Success(()) } else { CasResult::Retry })
    }

    fn check_failure_budget(&self, operation: &str, failures: u32, error: StoreError) -> Result<()> {
        if failures >= self.config.max_consecutive_store_failures {
            warn!(operation, attempts = failures, error = %error, "store unavailable, giving up");
            return Err(error).context(crate::error::StoreUnavailableSnafu {
                operation,
                attempts: failures,
            });
        }
        debug!(operation, attempts = failures, error = %error, "transient store failure, retrying");
        Ok(())
    }

    /// Apply `f` to the record under `key` until the write wins.
    ///
    /// `f` returns the record to write (or `None` to leave the store untouched)
    /// and the operation's output. It may run several times.
    pub(crate) async fn transition<R, T, F>(&self, key: &str, operation: &str, mut f: F) -> Result<T>
    where
        R: ContentionRecord,
        F: FnMut(Option<R>) -> Result<(Option<R>, T)>,
    {
        let mut backoff = self.store_backoff();
        let mut failures = 0u32;
        let mut conflicts = 0u32;

        loop {
            match self.try_transition(key, &mut f).await {
                Ok(CasResult::Success(output)) => return Ok(output),
                Ok(CasResult::Retry) => {
                    failures = 0;
                    conflicts += 1;
                    if conflicts >= MAX_CAS_RETRIES {
                        warn!(key, operation, conflicts, "transition kept conflicting, backing off");
                        tokio::time::sleep(backoff.next_sleep()).await;
                        conflicts = 0;
                    }
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Store(e)) => {
                    failures += 1;
                    self.check_failure_budget(operation, failures, e)?;
                    tokio::time::sleep(backoff.next_sleep()).await;
                }
            }
        }
    }

    async fn try_transition<R, T, F>(&self, key: &str, f: &mut F) -> Result<CasResult<T>, AttemptError>
    where
        R: ContentionRecord,
        F: FnMut(Option<R>) -> Result<(Option<R>, T)>,
    {
        let loaded = self.try_load::<R>(key).await?;
        let (current, version) = match loaded {
            Some((record, version)) => (Some(record), Some(version)),
            None => (None, None),
        };

        let (next, output) = f(current)?;
        match next {
            None => Ok(CasResult::Success(output)),
            Some(record) => match self.try_store(key, version, &record).await? {
                CasResult::Success(()) => Ok(CasResult::Success(output)),
                CasResult::Retry => Ok(CasResult::Retry),
            },
        }
    }

    /// Drive `contender` until it completes, times out, is cancelled or fails.
    ///
    /// On timeout or cancellation the contender's entries are withdrawn
    /// before returning. A dropped future withdraws from a spawned task.
    pub(crate) async fn run<C: Contender>(
        &self,
        key: &str,
        mut contender: C,
        lease: &Lease,
        bound: WaitBound<'_>,
    ) -> Result<C::Output> {
        let started = Instant::now();
        let deadline = bound.timeout.map(|t| started + t);
        let operation = contender.describe();

        let mut changes = self.store.subscribe(key);
        let mut liveness = LeaseLiveness::new(self.store.clone());
        let mut poll = Backoff::new(self.config.poll_initial_backoff_ms, self.config.poll_max_backoff_ms);
        let mut store_backoff = self.store_backoff();
        let mut failures = 0u32;
        let mut conflicts = 0u32;
        let mut guard = WithdrawGuard::new(self.clone(), key, contender.clone());

        loop {
            if let Err(e) = lease.ensure_active() {
                guard.disarm();
                return Err(e);
            }
            if bound.cancel.is_some_and(|t| t.is_cancelled()) {
                return self.abandon(&mut guard, key, AtomaError::Cancelled { operation }).await;
            }

            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if let Some(rx) = changes.as_mut() {
                rx.borrow_and_update();
            }
            let ctx = AttemptContext {
                now_ms: now_unix_ms(),
                may_enqueue: !expired,
            };

            match self.attempt(key, &mut contender, lease.id(), &mut liveness, &ctx).await {
                Ok(Attempted::Complete(output)) => {
                    guard.disarm();
                    return Ok(output);
                }
                Ok(Attempted::Conflict) => {
                    failures = 0;
                    conflicts += 1;
                    if conflicts < MAX_CAS_RETRIES {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    conflicts = 0;
                }
                Ok(Attempted::Waiting) => {
                    failures = 0;
                    conflicts = 0;
                    store_backoff.reset();
                }
                Err(AttemptError::Fatal(e)) => return self.abandon(&mut guard, key, e).await,
                Err(AttemptError::Store(e)) => {
                    failures += 1;
                    if expired {
                        let err = AtomaError::StoreUnavailable {
                            operation,
                            attempts: failures,
                            source: e,
                        };
                        return self.abandon(&mut guard, key, err).await;
                    }
                    if let Err(err) = self.check_failure_budget(&operation, failures, e) {
                        return self.abandon(&mut guard, key, err).await;
                    }
                    let sleep = clamp_to_deadline(store_backoff.next_sleep(), deadline);
                    if let Woke::Cancelled = wait_for_change(None, sleep, bound.cancel).await {
                        return self.abandon(&mut guard, key, AtomaError::Cancelled { operation }).await;
                    }
                    continue;
                }
            }

            if expired {
                let err = AtomaError::Timeout {
                    operation,
                    waited_ms: started.elapsed().as_millis() as u64,
                };
                return self.abandon(&mut guard, key, err).await;
            }

            let sleep = clamp_to_deadline(poll.next_sleep(), deadline);
            match wait_for_change(changes.as_mut(), sleep, bound.cancel).await {
                Woke::Changed => poll.reset(),
                Woke::Elapsed => {}
                Woke::Cancelled => {
                    return self.abandon(&mut guard, key, AtomaError::Cancelled { operation }).await;
                }
            }
        }
    }

    async fn attempt<C: Contender>(
        &self,
        key: &str,
        contender: &mut C,
        own_lease: &str,
        liveness: &mut LeaseLiveness,
        ctx: &AttemptContext,
    ) -> Result<Attempted<C::Output>, AttemptError> {
        let (current, version, pruned) = match self.try_load::<C::Record>(key).await? {
            None => (None, None, None),
            Some((mut record, version)) => {
                let mut others = record.lease_ids();
                others.remove(own_lease);
                let dead = liveness.dead_among(&others, ctx.now_ms).await?;
                let pruned = if !dead.is_empty() && record.evict_leases(&dead) {
                    debug!(key, dead = ?dead, "evicting entries of expired leases");
                    Some(record.clone())
                } else {
                    None
                };
                (Some(record), Some(version), pruned)
            }
        };

        let (next, output) = match contender.evaluate(current, ctx)? {
            Step::Complete { next, output } => (next, Some(output)),
            Step::Wait { next } => (next, None),
        };

        let written = match next.or(pruned) {
            Some(record) => match self.try_store(key, version, &record).await? {
                CasResult::Success(()) => Some(record),
                CasResult::Retry => return Ok(Attempted::Conflict),
            },
            None => None,
        };

        match output {
            Some(output) => Ok(Attempted::Complete(output)),
            None => {
                if let Some(record) = &written {
                    contender.committed(record);
                }
                Ok(Attempted::Waiting)
            }
        }
    }

    /// Withdraw the guarded contender and return `error`.
    async fn abandon<C: Contender, T>(&self, guard: &mut WithdrawGuard<C>, key: &str, error: AtomaError) -> Result<T> {
        if let Some(contender) = guard.disarm() {
            self.withdraw(key, &contender).await;
        }
        Err(error)
    }

    /// Best-effort removal of a contender's waiting entries.
    pub(crate) async fn withdraw<C: Contender>(&self, key: &str, contender: &C) {
        let result = self
            .transition(key, "withdraw", |current: Option<C::Record>| {
                Ok((current.and_then(|record| contender.withdraw(record)), ()))
            })
            .await;

        if let Err(e) = result {
            warn!(key, operation = %contender.describe(), error = %e, "failed to withdraw waiting entry");
        }
    }
}

fn clamp_to_deadline(sleep: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(d) => sleep.min(d.saturating_duration_since(Instant::now())),
        None => sleep,
    }
}

async fn wait_for_change(
    changes: Option<&mut watch::Receiver<u64>>,
    sleep: Duration,
    cancel: Option<&CancellationToken>,
) -> Woke {
    let changed = async {
        match changes {
            Some(rx) => {
                if rx.changed().await.is_err() {
                    pending::<()>().await;
                }
            }
            None => pending::<()>().await,
        }
    };
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Woke::Cancelled,
        _ = changed => Woke::Changed,
        _ = tokio::time::sleep(sleep) => Woke::Elapsed,
    }
}

/// Withdraws a contender whose `run` future was dropped mid-wait.
struct WithdrawGuard<C: Contender> {
    queue: ContentionQueue,
    key: String,
    contender: Option<C>,
}

impl<C: Contender> WithdrawGuard<C> {
    fn new(queue: ContentionQueue, key: &str, contender: C) -> Self {
        Self {
            queue,
            key: key.to_string(),
            contender: Some(contender),
        }
    }

    fn disarm(&mut self) -> Option<C> {
        self.contender.take()
    }
}

impl<C: Contender> Drop for WithdrawGuard<C> {
    fn drop(&mut self) {
        let Some(contender) = self.contender.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let queue = self.queue.clone();
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            queue.withdraw(&key, &contender).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use atoma_store::InMemoryCoordinationStore;

    use super::*;
    use crate::rwlock::ResourceRecord;

    fn queue(store: Arc<InMemoryCoordinationStore>) -> ContentionQueue {
        let config = AtomaConfig {
            store_retry_initial_backoff_ms: 1,
            store_retry_max_backoff_ms: 2,
            max_consecutive_store_failures: 3,
            ..Default::default()
        };
        ContentionQueue::new(store, Arc::new(config))
    }

    #[tokio::test]
    async fn test_transition_creates_then_updates() {
        let store = InMemoryCoordinationStore::new();
        let queue = queue(store.clone());

        queue
            .transition("k", "create", |current: Option<ResourceRecord>| {
                assert!(current.is_none());
                Ok((Some(ResourceRecord::new("r", 7)), ()))
            })
            .await
            .unwrap();

        let ticket = queue
            .transition("k", "bump", |current: Option<ResourceRecord>| {
                let mut record = current.unwrap();
                record.next_ticket += 1;
                let ticket = record.next_ticket;
                Ok((Some(record), ticket))
            })
            .await
            .unwrap();
        assert_eq!(ticket, 2);

        let (record, _) = queue.load::<ResourceRecord>("k").await.unwrap().unwrap();
        assert_eq!(record.next_ticket, 2);
        assert_eq!(record.created_at_ms, 7);
    }

    #[tokio::test]
    async fn test_transition_without_change_writes_nothing() {
        let store = InMemoryCoordinationStore::new();
        let queue = queue(store.clone());

        let output = queue
            .transition("k", "noop", |_: Option<ResourceRecord>| Ok((None, "untouched")))
            .await
            .unwrap();
        assert_eq!(output, "untouched");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transition_gives_up_after_failure_budget() {
        let store = InMemoryCoordinationStore::new();
        let queue = queue(store.clone());
        store.set_unavailable(true);

        let err = queue
            .transition("k", "create", |_: Option<ResourceRecord>| Ok((Some(ResourceRecord::new("r", 0)), ())))
            .await
            .unwrap_err();
        assert!(matches!(err, AtomaError::StoreUnavailable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_corrupted_record_is_fatal() {
        let store = InMemoryCoordinationStore::new();
        store.create_if_absent("k", "not json".to_string()).await.unwrap();

        let err = queue(store).load::<ResourceRecord>("k").await.unwrap_err();
        assert!(matches!(err, AtomaError::CorruptedRecord { .. }));
    }
}
