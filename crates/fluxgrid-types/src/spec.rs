//! Per-type machine defaults.

use serde::{Deserialize, Serialize};

use crate::Energy;

/// Default quantities applied to every machine created from a type key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Energy consumed by one successful `run`.
    #[serde(default)]
    pub energy_cost: Energy,
    /// Capacity upper bound.
    #[serde(default)]
    pub max_energy: Energy,
    /// Energy a freshly created machine starts with.
    #[serde(default)]
    pub start_energy: Energy,
    /// Default per-tick quantity pushed along each outgoing link.
    #[serde(default)]
    pub transfer_rate: Energy,
}

impl MachineSpec {
    /// Build a spec from its four quantities.
    pub const fn new(
        energy_cost: Energy,
        max_energy: Energy,
        start_energy: Energy,
        transfer_rate: Energy,
    ) -> Self {
        Self {
            energy_cost,
            max_energy,
            start_energy,
            transfer_rate,
        }
    }
}
