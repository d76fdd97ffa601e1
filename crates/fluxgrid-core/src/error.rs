//! Error types for the `fluxgrid-core` crate.
//!
//! Lookups that find nothing are not errors: every read path returns an
//! `Option` instead. [`CoreError`] covers what a caller must see.

use fluxgrid_store::StoreError;
use fluxgrid_types::NetworkId;

use crate::config::ConfigError;

/// Errors surfaced by core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A required identity, type key, or location was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted field would exceed the backend's signed 32-bit bound.
    #[error("value {value} out of range for field {field} of {key}")]
    ValueOutOfRange {
        /// Group key being written.
        key: String,
        /// Field name being written.
        field: String,
        /// The rejected value.
        value: i64,
    },

    /// Any other persistence failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// The identifier allocator kept colliding with existing records.
    #[error("identifier allocation gave up after {attempts} attempts")]
    AllocationExhausted {
        /// Number of candidates tried.
        attempts: u32,
    },

    /// A chain revisited a machine or referenced one that cannot be resolved.
    ///
    /// Never propagated out of a tick: the affected network is skipped and
    /// the condition logged.
    #[error("corrupt topology in network {network}: {reason}")]
    CorruptTopology {
        /// The affected network.
        network: NetworkId,
        /// What the traversal ran into.
        reason: String,
    },

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ValueOutOfRange { key, field, value } => {
                Self::ValueOutOfRange { key, field, value }
            }
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_errors_are_lifted() {
        let err = CoreError::from(StoreError::ValueOutOfRange {
            key: "machine:a".to_owned(),
            field: "energy".to_owned(),
            value: 1 << 40,
        });
        assert!(matches!(err, CoreError::ValueOutOfRange { .. }));
    }

    #[test]
    fn other_store_errors_are_wrapped() {
        let err = CoreError::from(StoreError::Poisoned);
        assert!(matches!(err, CoreError::Store(StoreError::Poisoned)));
    }
}
