//! Pure lease timing functions.
//!
//! # Tiger Style
//!
//! - Time is passed explicitly (no calls to system time)
//! - Saturating arithmetic on all timestamps

/// Lease key prefix.
pub use atoma_constants::keys::LEASE_PREFIX;

/// Generate the key of a lease record.
#[inline]
pub fn lease_key(lease_id: &str) -> String {
    format!("{LEASE_PREFIX}{lease_id}")
}

/// Deadline of a lease renewed at `now_ms`.
#[inline]
pub fn compute_lease_deadline(now_ms: u64, ttl_ms: u64) -> u64 {
    now_ms.saturating_add(ttl_ms)
}

/// A lease is expired once its deadline has passed.
#[inline]
pub fn is_lease_expired(deadline_ms: u64, now_ms: u64) -> bool {
    now_ms > deadline_ms
}

/// Interval between scheduled renewals, never zero.
///
/// ```
/// use atoma_coordination::pure::lease::renewal_interval_ms;
///
/// assert_eq!(renewal_interval_ms(30_000, 3), 10_000);
/// ```
#[inline]
pub fn renewal_interval_ms(ttl_ms: u64, divisor: u32) -> u64 {
    ttl_ms.checked_div(u64::from(divisor)).unwrap_or(ttl_ms).max(1)
}

/// Delay before retrying a failed renewal.
///
/// Returns `None` when the deadline has already passed: the lease cannot be
/// saved anymore. Otherwise the retry happens after `backoff_ms`, but no later
/// than the deadline itself.
#[inline]
pub fn renewal_retry_delay_ms(backoff_ms: u64, deadline_ms: u64, now_ms: u64) -> Option<u64> {
    if is_lease_expired(deadline_ms, now_ms) {
        return None;
    }
    Some(backoff_ms.min(deadline_ms.saturating_sub(now_ms)))
}
