//! Error types for coordination store operations.

use snafu::Snafu;

/// Errors from a [`CoordinationStore`](crate::CoordinationStore).
///
/// Version conflicts are not errors; they are reported through
/// [`WriteOutcome::Conflict`](crate::WriteOutcome::Conflict) and
/// [`CreateOutcome::AlreadyExists`](crate::CreateOutcome::AlreadyExists).
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The store could not be reached or refused the operation transiently.
    #[snafu(display("store unavailable during {operation}: {reason}"))]
    Unavailable {
        /// The store operation that failed.
        operation: String,
        /// Backend-specific description.
        reason: String,
    },

    /// The key was rejected by the backend.
    #[snafu(display("invalid key '{key}': {reason}"))]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}
