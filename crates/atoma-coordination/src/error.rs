//! Error types for coordination primitives.

use atoma_store::StoreError;
use snafu::Snafu;

use crate::lease::LeaseState;
use crate::types::LockMode;

/// Errors from leases, locks and barriers.
///
/// Version conflicts on the store never surface here; they are retried
/// internally.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AtomaError {
    /// A bounded wait elapsed before the operation could complete.
    #[snafu(display("operation timed out after {waited_ms}ms: {operation}"))]
    Timeout {
        /// Description of the operation.
        operation: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The store stayed unreachable across the retry budget.
    #[snafu(display("store unavailable during {operation} after {attempts} attempts: {source}"))]
    StoreUnavailable {
        /// Description of the operation.
        operation: String,
        /// Consecutive failed attempts.
        attempts: u32,
        /// The last store error.
        source: StoreError,
    },

    /// Release by an identity that does not hold the lock.
    #[snafu(display("current task does not hold the lock: {mode} lock on '{resource}'"))]
    IllegalMonitorState {
        /// Lock resource identifier.
        resource: String,
        /// Mode of the release attempt.
        mode: LockMode,
    },

    /// A barrier was resolved with a party count different from the stored one.
    #[snafu(display("barrier '{barrier}' has {existing} parties, requested {requested}"))]
    BarrierConfigMismatch {
        /// Barrier identifier.
        barrier: String,
        /// Party count already recorded in the store.
        existing: u32,
        /// Party count the caller asked for.
        requested: u32,
    },

    /// The lease backing the handle has expired or was closed.
    #[snafu(display("lease '{lease_id}' is not active: {state}"))]
    LeaseNotActive {
        /// The lease identifier.
        lease_id: String,
        /// The lease state observed.
        state: LeaseState,
    },

    /// A cancellable wait was cancelled by its token.
    #[snafu(display("operation cancelled: {operation}"))]
    Cancelled {
        /// Description of the operation.
        operation: String,
    },

    /// The handle was closed before the operation.
    #[snafu(display("{what} handle is closed"))]
    HandleClosed {
        /// Kind and name of the closed handle.
        what: String,
    },

    /// A record would exceed its bounded capacity.
    #[snafu(display("too many {what} on '{key}': {count} (max: {max})"))]
    CapacityExceeded {
        /// Record key.
        key: String,
        /// What is being counted.
        what: &'static str,
        /// Current count.
        count: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// An argument was out of its accepted range.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// Description of the violated bound.
        reason: String,
    },

    /// A record in the store could not be decoded or encoded.
    #[snafu(display("corrupted record in key '{key}': {source}"))]
    CorruptedRecord {
        /// The key holding the record.
        key: String,
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl AtomaError {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AtomaError::Timeout { .. } | AtomaError::StoreUnavailable { .. })
    }

    /// Returns true for [`AtomaError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, AtomaError::Timeout { .. })
    }
}

/// Convenience alias for results in this crate.
pub type Result<T, E = AtomaError> = std::result::Result<T, E>;
