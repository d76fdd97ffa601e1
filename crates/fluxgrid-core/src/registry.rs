//! Table of live networks keyed by id.
//!
//! The registry is rebuilt from `network:*` groups at startup. Network
//! creation sequences come from a counter in the meta group so that "older"
//! survives restarts.

use std::collections::BTreeMap;
use std::ops::Bound;

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema::{self, META_GROUP, NETWORK_PREFIX, field};
use fluxgrid_types::{MachineId, NetworkId};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::network::Network;
use crate::record::Record;

/// Live networks.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<NetworkId, Network>,
}

impl NetworkRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            networks: BTreeMap::new(),
        }
    }

    /// Network `id`, if live.
    pub fn get(&self, id: &NetworkId) -> Option<&Network> {
        self.networks.get(id)
    }

    /// Mutable network `id`, if live.
    pub fn get_mut(&mut self, id: &NetworkId) -> Option<&mut Network> {
        self.networks.get_mut(id)
    }

    /// Register a network, replacing any entry with the same id.
    pub fn insert(&mut self, network: Network) {
        self.networks.insert(network.id().clone(), network);
    }

    /// Unregister and return network `id`.
    pub fn remove(&mut self, id: &NetworkId) -> Option<Network> {
        self.networks.remove(id)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &NetworkId) -> bool {
        self.networks.contains_key(id)
    }

    /// Number of live networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no network is live.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Live networks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Live network ids, ascending.
    pub fn ids(&self) -> Vec<NetworkId> {
        self.networks.keys().cloned().collect()
    }

    /// The network whose member set holds `machine`.
    pub fn find_containing(&self, machine: &MachineId) -> Option<NetworkId> {
        self.networks
            .values()
            .find(|network| network.contains(machine))
            .map(|network| network.id().clone())
    }

    /// The first live network id strictly after `after` (or the first one).
    pub fn next_after(&self, after: Option<&NetworkId>) -> Option<NetworkId> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.networks
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(id, _)| id.clone())
    }

    /// Reload every network group from the store.
    ///
    /// Empty network groups are deleted on the way. Returns the number of
    /// live networks.
    pub async fn rebuild<S: FieldStore>(&mut self, store: &S) -> Result<usize, CoreError> {
        self.networks.clear();
        let mut keys: Vec<String> = store
            .list_groups()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(NETWORK_PREFIX))
            .collect();
        keys.sort();

        for key in keys {
            let Some(id) = schema::network_id_from_key(&key) else {
                continue;
            };
            let record = Record::load(store, &key).await?;
            let network = Network::rehydrate(id, &record);
            if network.is_empty() {
                warn!(network = %network.id(), "deleting empty network record");
                network.destroy(store).await?;
                continue;
            }
            self.insert(network);
        }
        info!(networks = self.networks.len(), "network registry rebuilt");
        Ok(self.networks.len())
    }
}

/// Issue the next network creation sequence.
///
/// # Errors
///
/// Returns [`CoreError::ValueOutOfRange`] once the counter would leave the
/// field range.
pub async fn next_sequence<S: FieldStore>(store: &S) -> Result<u32, CoreError> {
    let current = store
        .get_field(META_GROUP, field::NETWORK_SEQUENCE)
        .await?
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0);
    let next = current.saturating_add(1);
    store
        .set_field(META_GROUP, field::NETWORK_SEQUENCE, i64::from(next))
        .await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use fluxgrid_store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn sequence_is_monotone_and_persisted() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        assert_eq!(next_sequence(&store).await?, 1);
        assert_eq!(next_sequence(&store).await?, 2);
        assert_eq!(
            store.get_field(META_GROUP, field::NETWORK_SEQUENCE).await?,
            Some(2)
        );
        Ok(())
    }

    #[tokio::test]
    async fn sequence_overflow_is_reported() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        store
            .set_field(META_GROUP, field::NETWORK_SEQUENCE, i64::from(i32::MAX))
            .await?;
        let result = next_sequence(&store).await;
        assert!(matches!(result, Err(CoreError::ValueOutOfRange { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_loads_live_and_drops_empty() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut live = Network::create(&store, NetworkId::new("b"), 1).await?;
        live.add_member(&store, &MachineId::new("m")).await?;
        Network::create(&store, NetworkId::new("a"), 2).await?;

        let mut registry = NetworkRegistry::new();
        assert_eq!(registry.rebuild(&store).await?, 1);
        assert!(registry.contains(&NetworkId::new("b")));
        assert!(!store.group_exists("network:a").await?);
        assert_eq!(
            registry.find_containing(&MachineId::new("m")),
            Some(NetworkId::new("b"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn next_after_walks_in_id_order() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut registry = NetworkRegistry::new();
        for id in ["a", "c"] {
            registry.insert(Network::create(&store, NetworkId::new(id), 1).await?);
        }
        assert_eq!(registry.next_after(None), Some(NetworkId::new("a")));
        assert_eq!(
            registry.next_after(Some(&NetworkId::new("a"))),
            Some(NetworkId::new("c"))
        );
        assert_eq!(
            registry.next_after(Some(&NetworkId::new("b"))),
            Some(NetworkId::new("c"))
        );
        assert_eq!(registry.next_after(Some(&NetworkId::new("c"))), None);
        Ok(())
    }
}
