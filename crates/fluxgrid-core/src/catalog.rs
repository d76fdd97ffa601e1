//! Static table of per-type machine defaults.
//!
//! External plumbing reports placements by type key; only registered keys
//! become machines.

use std::collections::BTreeMap;

use fluxgrid_types::MachineSpec;

use crate::error::CoreError;

/// Registered machine types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineCatalog {
    types: BTreeMap<String, MachineSpec>,
}

impl MachineCatalog {
    /// Create an empty catalog.
    pub const fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Register or replace the defaults for `type_key`.
    ///
    /// Returns the previous defaults if the key was already registered.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an empty key or a start
    /// energy above the capacity.
    pub fn register(
        &mut self,
        type_key: &str,
        spec: MachineSpec,
    ) -> Result<Option<MachineSpec>, CoreError> {
        if type_key.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "machine type key must not be empty".to_owned(),
            ));
        }
        if spec.start_energy > spec.max_energy {
            return Err(CoreError::InvalidArgument(format!(
                "start energy {} exceeds max energy {} for type {type_key}",
                spec.start_energy, spec.max_energy
            )));
        }
        Ok(self.types.insert(type_key.to_owned(), spec))
    }

    /// Whether `type_key` is registered.
    pub fn is_registered(&self, type_key: &str) -> bool {
        self.types.contains_key(type_key)
    }

    /// Defaults for `type_key`.
    pub fn get(&self, type_key: &str) -> Option<MachineSpec> {
        self.types.get(type_key).copied()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
