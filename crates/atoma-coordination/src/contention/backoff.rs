//! Stateful backoff driven by the pure jitter computation.

use std::time::Duration;

use crate::pure::backoff::compute_backoff_with_jitter;

/// Exponential backoff with jitter, reset on progress.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub(crate) fn new(initial_ms: u64, max_ms: u64) -> Self {
        debug_assert!(initial_ms > 0, "BACKOFF: initial_ms must be positive");
        debug_assert!(initial_ms <= max_ms, "BACKOFF: initial_ms must not exceed max_ms");
        Self {
            initial_ms,
            max_ms,
            current_ms: initial_ms,
        }
    }

    /// Next sleep duration; doubles the backoff for the following call.
    pub(crate) fn next_sleep(&mut self) -> Duration {
        let result = compute_backoff_with_jitter(self.current_ms, self.max_ms, rand::random());
        self.current_ms = result.next_backoff_ms.max(self.initial_ms);
        Duration::from_millis(result.sleep_ms)
    }

    pub(crate) fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_resets() {
        let mut backoff = Backoff::new(10, 40);

        let first = backoff.next_sleep();
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));

        backoff.next_sleep();
        backoff.next_sleep();
        let capped = backoff.next_sleep();
        assert!(capped >= Duration::from_millis(40) && capped <= Duration::from_millis(60));

        backoff.reset();
        assert!(backoff.next_sleep() <= Duration::from_millis(15));
    }
}
