//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and the tick loop.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: fluxgrid_core::config::ConfigError,
    },

    /// The persistence backend could not be opened.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: fluxgrid_store::StoreError,
    },

    /// The grid failed while opening or ticking.
    #[error("grid error: {source}")]
    Core {
        /// The underlying core error.
        #[from]
        source: fluxgrid_core::CoreError,
    },
}
