//! Pure barrier arrival functions.

/// Barrier key prefix.
pub use atoma_constants::keys::BARRIER_PREFIX;

/// Generate the key of a barrier record.
#[inline]
pub fn barrier_key(barrier_id: &str) -> String {
    format!("{BARRIER_PREFIX}{barrier_id}")
}

/// Whether the next arrival completes the generation.
///
/// `already_arrived` counts arrivals of the current generation before this one.
#[inline]
pub fn arrival_trips(parties: u32, already_arrived: u32) -> bool {
    already_arrived.saturating_add(1) >= parties
}

/// Arrival index returned to a waiter.
///
/// The first party to arrive gets `parties - 1`, the one that trips the
/// barrier gets `0`.
#[inline]
pub fn arrival_index(parties: u32, already_arrived: u32) -> u32 {
    parties.saturating_sub(1).saturating_sub(already_arrived)
}

/// Whether a waiter that arrived in `arrived_generation` has been released.
#[inline]
pub fn is_released(arrived_generation: u64, current_generation: u64) -> bool {
    current_generation > arrived_generation
}
