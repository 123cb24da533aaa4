//! Backoff computation for contention polling and store retries.

/// Result of a backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffResult {
    /// How long to sleep now.
    pub sleep_ms: u64,
    /// The backoff value for the next iteration.
    pub next_backoff_ms: u64,
}

/// Next sleep of a backoff sequence and the step after it.
///
/// Drives both the poll interval of a waiting contender and the retry delay
/// after a transient store failure. The jitter is `jitter_seed` reduced into
/// `0..=current/2`; the step doubles up to `max_backoff_ms`.
///
/// ```
/// use atoma_coordination::pure::backoff::compute_backoff_with_jitter;
///
/// let step = compute_backoff_with_jitter(8, 50, 3);
/// assert_eq!(step.sleep_ms, 11);
/// assert_eq!(step.next_backoff_ms, 16);
///
/// let capped = compute_backoff_with_jitter(40, 50, 0);
/// assert_eq!(capped.next_backoff_ms, 50);
/// ```
#[inline]
pub fn compute_backoff_with_jitter(current_backoff_ms: u64, max_backoff_ms: u64, jitter_seed: u64) -> BackoffResult {
    let max_jitter = current_backoff_ms.saturating_div(2).saturating_add(1);
    let jitter = jitter_seed % max_jitter;

    let sleep_ms = current_backoff_ms.saturating_add(jitter);
    let next_backoff_ms = current_backoff_ms.saturating_mul(2).min(max_backoff_ms);

    BackoffResult {
        sleep_ms,
        next_backoff_ms,
    }
}
