//! Record and outcome types shared by store implementations.

/// A record as read from the store, with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// Serialized record body.
    pub value: String,
    /// Version token. Any successful write to the key produces a new one.
    pub version: u64,
}

/// Result of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied and the record now carries `version`.
    Written {
        /// Version of the record after the write.
        version: u64,
    },
    /// The record changed (or vanished) since the expected version was read.
    Conflict,
}

impl WriteOutcome {
    /// Returns true if the write was applied.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The record was created at `version`.
    Created {
        /// Version of the new record.
        version: u64,
    },
    /// A record already exists under the key.
    AlreadyExists,
}

impl CreateOutcome {
    /// Returns true if the record was created.
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created { .. })
    }
}
