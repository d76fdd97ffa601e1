//! Shared type definitions for the Fluxgrid energy network engine.
//!
//! # Modules
//!
//! - [`ids`] -- String-backed identifiers for machines and networks
//! - [`location`] -- Block positions and face adjacency
//! - [`spec`] -- Per-type machine defaults

pub mod ids;
pub mod location;
pub mod spec;

pub use ids::{MachineId, NetworkId};
pub use location::Location;
pub use spec::MachineSpec;

/// Scalar energy quantity.
///
/// Quantities are never negative. The persistence backend bounds every field
/// to the signed 32-bit range, so values above `i32::MAX` are rejected when
/// they are written.
pub type Energy = u32;
