//! Background lease renewal.
//!
//! One scheduler per client. Each lease gets a renewal loop running under a
//! child of the scheduler's cancellation token, so closing a lease stops its
//! loop and shutting the scheduler down stops all of them.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::warn;

use super::LeaseInner;
use super::manager::RenewAttempt;
use super::manager::renew_once;
use crate::contention::Backoff;
use crate::pure::lease::renewal_interval_ms;
use crate::pure::lease::renewal_retry_delay_ms;
use crate::types::now_unix_ms;

pub(crate) struct RenewalScheduler {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RenewalScheduler {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Token for a new lease; cancelled when the scheduler shuts down.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start the renewal loop of `lease`.
    pub(crate) fn schedule(&self, lease: Arc<LeaseInner>) {
        self.tracker.spawn(run_renewal_loop(lease));
    }

    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_renewal_loop(lease: Arc<LeaseInner>) {
    let config = lease.queue().config();
    let ttl_ms = lease.ttl().as_millis() as u64;
    let interval_ms = renewal_interval_ms(ttl_ms, config.renewal_divisor);
    let interval = Duration::from_millis(interval_ms);
    let mut backoff = Backoff::new(config.store_retry_initial_backoff_ms, config.store_retry_max_backoff_ms);
    let cancel = lease.renewal_token().clone();

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(lease_id = lease.id(), interval_ms, "lease renewal started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(lease_id = lease.id(), "lease renewal stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        if !renew_before_deadline(&lease, &cancel, &mut backoff).await {
            return;
        }
    }
}

/// Renew `lease`, retrying until it succeeds or the deadline passes.
///
/// Returns false when the loop should stop.
async fn renew_before_deadline(lease: &LeaseInner, cancel: &CancellationToken, backoff: &mut Backoff) -> bool {
    backoff.reset();

    loop {
        match renew_once(lease).await {
            Ok(RenewAttempt::Renewed { .. }) => return true,
            Ok(RenewAttempt::Conflict) => continue,
            Ok(RenewAttempt::Revoked) => {
                lease.mark_expired("lease record missing");
                return false;
            }
            Ok(RenewAttempt::Expired) => {
                lease.mark_expired("deadline passed before renewal");
                return false;
            }
            Err(e) => {
                let backoff_ms = backoff.next_sleep().as_millis() as u64;
                let Some(delay_ms) = renewal_retry_delay_ms(backoff_ms, lease.deadline_ms(), now_unix_ms()) else {
                    lease.mark_expired("store unavailable until deadline");
                    return false;
                };
                warn!(lease_id = lease.id(), error = %e, retry_in_ms = delay_ms, "lease renewal failed");

                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
        }
    }
}
