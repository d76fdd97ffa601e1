//! Type-safe identifier wrappers around [`String`].
//!
//! Machines and networks are keyed by opaque string tokens so that a record
//! read back from the store can be addressed without parsing. Fresh machine
//! identifiers are random UUID v4 text; network identifiers are either
//! derived from a machine (`net-{machine}`) or freshly generated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing token.
            pub fn new(token: impl Into<String>) -> Self {
                Self(token.into())
            }

            /// Create a new identifier from a random UUID v4.
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the token as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the owned token.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(token: String) -> Self {
                Self(token)
            }
        }

        impl From<&str> for $name {
            fn from(token: &str) -> Self {
                Self(token.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a machine (a node holding energy).
    MachineId
}

define_id! {
    /// Unique identifier for a network (a connected group of machines).
    NetworkId
}

impl NetworkId {
    /// Deterministic network identifier derived from the machine whose
    /// adjacency event created the network.
    pub fn derived_from(machine: &MachineId) -> Self {
        Self(format!("net-{machine}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct() {
        let a = MachineId::random();
        let b = MachineId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn derived_network_id_is_stable() {
        let machine = MachineId::new("abc");
        assert_eq!(NetworkId::derived_from(&machine), NetworkId::new("net-abc"));
        assert_eq!(
            NetworkId::derived_from(&machine),
            NetworkId::derived_from(&machine)
        );
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = MachineId::new("m-1");
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json.as_deref(), Some("\"m-1\""));
    }
}
