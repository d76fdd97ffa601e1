//! Persisted key and field layout.
//!
//! The backend only stores integers, so references to other records are
//! encoded in field *names* with a value of `1`.
//!
//! # Key Patterns
//!
//! | Pattern | Field | Value |
//! |---------|-------|-------|
//! | `machine:{id}` | `x`, `y`, `z`, `dimension` | Coordinates |
//! | `machine:{id}` | `energy_cost`, `max_energy`, `energy`, `transfer_rate` | Quantities |
//! | `machine:{id}` | `type:{key}` | `1` |
//! | `machine:{id}` | `link:{target}` | Link priority |
//! | `machine:{id}` | `network:{id}` | `1` |
//! | `machine:{id}` | `next:{machine}` | `1` |
//! | `network:{id}` | `created` | Creation sequence |
//! | `network:{id}` | `member:{machine}` | `1` |
//! | `network:{id}` | `head:{machine}`, `last:{machine}` | `1` |
//! | `fluxgrid:meta` | `network_sequence` | Last issued creation sequence |

use fluxgrid_types::{MachineId, NetworkId};

/// Key prefix of machine groups.
pub const MACHINE_PREFIX: &str = "machine:";

/// Key prefix of network groups.
pub const NETWORK_PREFIX: &str = "network:";

/// Group holding engine-wide counters.
pub const META_GROUP: &str = "fluxgrid:meta";

/// Scalar field names.
pub mod field {
    /// X coordinate.
    pub const X: &str = "x";
    /// Y coordinate.
    pub const Y: &str = "y";
    /// Z coordinate.
    pub const Z: &str = "z";
    /// Dimension numeral.
    pub const DIMENSION: &str = "dimension";
    /// Energy consumed per run.
    pub const ENERGY_COST: &str = "energy_cost";
    /// Capacity.
    pub const MAX_ENERGY: &str = "max_energy";
    /// Current energy.
    pub const ENERGY: &str = "energy";
    /// Default transfer rate.
    pub const TRANSFER_RATE: &str = "transfer_rate";
    /// Network creation sequence.
    pub const CREATED: &str = "created";
    /// Last issued network creation sequence (meta group).
    pub const NETWORK_SEQUENCE: &str = "network_sequence";
}

/// Reference field prefixes.
pub mod reference {
    /// Machine type key.
    pub const TYPE: &str = "type:";
    /// Outgoing link, valued with its priority.
    pub const LINK: &str = "link:";
    /// Owning network back-reference.
    pub const NETWORK: &str = "network:";
    /// Chain successor.
    pub const NEXT: &str = "next:";
    /// Network member.
    pub const MEMBER: &str = "member:";
    /// Chain head.
    pub const HEAD: &str = "head:";
    /// Chain tail.
    pub const LAST: &str = "last:";
}

/// Group key of a machine record.
pub fn machine_key(id: &MachineId) -> String {
    format!("{MACHINE_PREFIX}{id}")
}

/// Group key of a network record.
pub fn network_key(id: &NetworkId) -> String {
    format!("{NETWORK_PREFIX}{id}")
}

/// Recover the machine id from a machine group key.
pub fn machine_id_from_key(key: &str) -> Option<MachineId> {
    key.strip_prefix(MACHINE_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(MachineId::from)
}

/// Recover the network id from a network group key.
pub fn network_id_from_key(key: &str) -> Option<NetworkId> {
    key.strip_prefix(NETWORK_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(NetworkId::from)
}

/// Build a reference field name.
pub fn ref_field(prefix: &str, target: &str) -> String {
    format!("{prefix}{target}")
}

/// Return the referenced token if `name` carries `prefix`.
pub fn strip_ref<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}
