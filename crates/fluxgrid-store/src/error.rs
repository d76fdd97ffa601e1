//! Error types for the persistence layer.
//!
//! All backend failures are propagated via [`StoreError`]. A field that was
//! never written is not an error: reads return `None` for it.

/// Errors that can occur in a [`FieldStore`](crate::FieldStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write would leave the signed 32-bit range of a field.
    #[error("value {value} out of range for field {field} of {key}")]
    ValueOutOfRange {
        /// Group key being written.
        key: String,
        /// Field name being written.
        field: String,
        /// The rejected value.
        value: i64,
    },

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A backend configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("in-memory store lock poisoned")]
    Poisoned,
}
