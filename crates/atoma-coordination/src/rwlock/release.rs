//! Lock release logic.

use tracing::debug;

use super::Lock;
use super::types::ReleaseOutcome;
use super::types::ResourceRecord;
use crate::error::AtomaError;
use crate::error::Result;

impl Lock {
    /// Release one level of the calling task's hold.
    ///
    /// Fails with [`AtomaError::IllegalMonitorState`] if the calling task does
    /// not hold this side of the lock. The holder entry is removed from the
    /// store once the count reaches zero; waiters notice on their next check.
    pub async fn unlock(&self) -> Result<()> {
        self.ensure_open()?;
        let shared = &self.shared;
        let contender = shared.contender();
        let not_held = || AtomaError::IllegalMonitorState {
            resource: shared.resource.clone(),
            mode: self.mode,
        };

        if shared.hold_count(&contender.task, self.mode) == 0 {
            return Err(not_held());
        }
        shared.lease.ensure_active()?;

        let mode = self.mode;
        let outcome = shared
            .lease
            .queue()
            .transition(&shared.key, "unlock", |current: Option<ResourceRecord>| {
                let Some(mut record) = current else {
                    return Ok((None, ReleaseOutcome::NotHeld));
                };
                match record.release(&contender, mode) {
                    ReleaseOutcome::NotHeld => Ok((None, ReleaseOutcome::NotHeld)),
                    outcome => Ok((Some(record), outcome)),
                }
            })
            .await?;

        match outcome {
            ReleaseOutcome::NotHeld => {
                // The store no longer knows this hold, so neither should we
                shared.forget(&contender.task, mode);
                Err(not_held())
            }
            ReleaseOutcome::Decremented { remaining } => {
                shared.record_released(&contender.task, mode);
                debug!(resource = %shared.resource, mode = %mode, remaining, "lock hold decremented");
                Ok(())
            }
            ReleaseOutcome::Released => {
                shared.record_released(&contender.task, mode);
                debug!(resource = %shared.resource, mode = %mode, lease_id = shared.lease.id(), "lock released");
                Ok(())
            }
        }
    }
}
