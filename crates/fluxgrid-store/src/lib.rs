//! Persistence adapter for the Fluxgrid energy network engine.
//!
//! The engine treats an external key-value store as its only durable source
//! of truth. This crate defines the narrow contract it persists through and
//! two implementations of it.
//!
//! # Architecture
//!
//! ```text
//! fluxgrid-core
//!     |
//!     +-- FieldStore (trait) --> MemoryStore     (tests, single process)
//!                            +-> DragonflyStore  (Redis hashes + index set)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- The [`FieldStore`] trait and the 32-bit range check
//! - [`schema`] -- Persisted key and field names
//! - [`memory`] -- Shared in-memory backend
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) backend
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod schema;
pub mod store;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{FieldStore, checked_field_value};
