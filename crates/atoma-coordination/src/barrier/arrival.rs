//! Arrival at a barrier, driven by the contention queue.

use tracing::debug;

use super::types::Arrival;
use super::types::BarrierRecord;
use crate::contention::AttemptContext;
use crate::contention::Contender;
use crate::contention::Step;
use crate::error::AtomaError;
use crate::error::Result;
use crate::pure::barrier::arrival_index;
use crate::pure::barrier::arrival_trips;
use crate::pure::barrier::is_released;
use crate::types::ContenderId;

#[derive(Debug, Clone)]
pub(crate) struct BarrierArrival {
    pub(crate) barrier_id: String,
    pub(crate) parties: u32,
    pub(crate) contender: ContenderId,
    /// Generation our arrival was written in, once it was.
    pub(crate) arrived_generation: Option<u64>,
    /// Index handed back to the caller when released.
    pub(crate) index: u32,
}

impl BarrierArrival {
    pub(crate) fn new(barrier_id: &str, parties: u32, contender: ContenderId) -> Self {
        Self {
            barrier_id: barrier_id.to_string(),
            parties,
            contender,
            arrived_generation: None,
            index: 0,
        }
    }
}

impl Contender for BarrierArrival {
    type Record = BarrierRecord;
    type Output = u32;

    fn describe(&self) -> String {
        format!("wait on barrier '{}'", self.barrier_id)
    }

    fn evaluate(&self, current: Option<BarrierRecord>, ctx: &AttemptContext) -> Result<Step<BarrierRecord, u32>> {
        let mut record = current.unwrap_or_else(|| BarrierRecord::new(&self.barrier_id, self.parties, ctx.now_ms));
        if record.parties != self.parties {
            return Err(AtomaError::BarrierConfigMismatch {
                barrier: self.barrier_id.clone(),
                existing: record.parties,
                requested: self.parties,
            });
        }

        if let Some(generation) = self.arrived_generation
            && is_released(generation, record.generation)
        {
            return Ok(Step::Complete {
                next: None,
                output: self.index,
            });
        }

        if record.arrival_position(&self.contender).is_some() {
            // A leftover arrival of ours from an abandoned wait is adopted by
            // rewriting it, which reports the position through `committed`
            let next = self.arrived_generation.is_none().then_some(record);
            return Ok(Step::Wait { next });
        }

        let already = record.waiting();
        if arrival_trips(self.parties, already) {
            record.trip();
            debug!(
                barrier = %self.barrier_id,
                generation = record.generation,
                parties = self.parties,
                "barrier tripped"
            );
            return Ok(Step::Complete {
                next: Some(record),
                output: 0,
            });
        }

        if !ctx.may_enqueue {
            return Ok(Step::Wait { next: None });
        }

        record.arrived.push(Arrival {
            contender: self.contender.clone(),
            arrived_at_ms: ctx.now_ms,
        });
        Ok(Step::Wait { next: Some(record) })
    }

    fn committed(&mut self, written: &BarrierRecord) {
        if self.arrived_generation == Some(written.generation) {
            return;
        }
        if let Some(position) = written.arrival_position(&self.contender) {
            self.arrived_generation = Some(written.generation);
            self.index = arrival_index(self.parties, position as u32);
        }
    }

    fn withdraw(&self, mut current: BarrierRecord) -> Option<BarrierRecord> {
        let before = current.arrived.len();
        current.arrived.retain(|a| a.contender != self.contender);
        (current.arrived.len() != before).then_some(current)
    }
}
