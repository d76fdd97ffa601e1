//! Core engine for Fluxgrid: self-organizing networks of energy machines.
//!
//! Machines store a bounded amount of energy. Machines that sit next to each
//! other, or are explicitly linked, form networks; the tick scheduler walks
//! those networks in small chunks and moves energy along links. Everything is
//! persisted through a [`fluxgrid_store::FieldStore`], which stays the only
//! durable source of truth: a [`Grid`] opened over an existing store rebuilds
//! the same machines and networks it left behind.
//!
//! # Architecture
//!
//! ```text
//! host events --> Grid --+-- Directory (location index + machine cache)
//!                        +-- NetworkRegistry --> Network --> chain
//!                        +-- IdAllocator
//!                        +-- MachineCatalog
//!                        +-- TickScheduler --> transfer
//!                        |
//!                        +-- FieldStore (Memory | Dragonfly)
//! ```
//!
//! # Modules
//!
//! - [`grid`] -- The context object owning every table
//! - [`machine`] -- Machine entity and creation builder
//! - [`directory`] -- Location- and id-keyed machine cache
//! - [`network`] -- Network entity
//! - [`registry`] -- Live network table and creation sequence
//! - [`formation`] -- Adjacency discovery, merge, split
//! - [`chain`] -- Ordered chain append, remove, walk, repair
//! - [`transfer`] -- Rate- and capacity-bounded energy transfer
//! - [`scheduler`] -- Chunked, resumable tick scheduler
//! - [`allocator`] -- Collision-checked identifier allocation
//! - [`catalog`] -- Per-type machine defaults
//! - [`record`] -- Typed view over a stored field group
//! - [`config`] -- YAML configuration
//! - [`error`] -- Error types

pub mod allocator;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod directory;
pub mod error;
pub mod formation;
pub mod grid;
pub mod machine;
pub mod network;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod transfer;

pub use config::GridConfig;
pub use error::CoreError;
pub use formation::{AdjacencyReport, JoinOutcome};
pub use grid::Grid;
pub use machine::{Machine, MachineBuilder};
pub use network::Network;
pub use scheduler::{TickScheduler, TickSummary};
pub use transfer::LinkedTransfer;
