//! A named connected component of machines.
//!
//! A [`Network`] mirrors the `network:{id}` group: its member set, the chain
//! endpoints, and a creation sequence used to tell older networks from newer
//! ones. Like machines, every mutation writes the store before the copy.
//!
//! Chain pointers on the members themselves are maintained by
//! [`crate::chain`]; this module only owns the endpoints.

use std::collections::BTreeSet;

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema::{self, field, ref_field, reference};
use fluxgrid_types::{MachineId, NetworkId};

use crate::error::CoreError;
use crate::record::{Record, replace_ref};

/// A connected set of machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    id: NetworkId,
    key: String,
    members: BTreeSet<MachineId>,
    head: Option<MachineId>,
    last: Option<MachineId>,
    created: u32,
}

impl Network {
    /// Write a new, empty network record.
    pub async fn create<S: FieldStore>(
        store: &S,
        id: NetworkId,
        created: u32,
    ) -> Result<Self, CoreError> {
        let key = schema::network_key(&id);
        store.ensure_group(&key).await?;
        store
            .set_field(&key, field::CREATED, i64::from(created))
            .await?;
        Ok(Self {
            id,
            key,
            members: BTreeSet::new(),
            head: None,
            last: None,
            created,
        })
    }

    /// Rebuild a network from its stored record.
    pub fn rehydrate(id: NetworkId, record: &Record) -> Self {
        Self {
            key: schema::network_key(&id),
            id,
            members: record
                .refs(reference::MEMBER)
                .map(|(member, _)| MachineId::from(member))
                .collect(),
            head: record.first_ref(reference::HEAD).map(MachineId::from),
            last: record.first_ref(reference::LAST).map(MachineId::from),
            created: record.quantity(field::CREATED),
        }
    }

    /// Identifier.
    pub const fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Store group key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Member ids, ascending.
    pub const fn members(&self) -> &BTreeSet<MachineId> {
        &self.members
    }

    /// Whether `machine` is a member.
    pub fn contains(&self, machine: &MachineId) -> bool {
        self.members.contains(machine)
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the network has no members left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First chain element.
    pub const fn head(&self) -> Option<&MachineId> {
        self.head.as_ref()
    }

    /// Last chain element.
    pub const fn last(&self) -> Option<&MachineId> {
        self.last.as_ref()
    }

    /// Creation sequence. Smaller is older.
    pub const fn created(&self) -> u32 {
        self.created
    }

    /// Whether this network absorbs `other` in a merge.
    ///
    /// Larger membership wins; ties go to the older network, then to the
    /// smaller id.
    pub fn outranks(&self, other: &Self) -> bool {
        self.len()
            .cmp(&other.len())
            .then_with(|| other.created.cmp(&self.created))
            .then_with(|| other.id.cmp(&self.id))
            .is_gt()
    }

    /// Add a member. Returns `false` if it already was one.
    pub async fn add_member<S: FieldStore>(
        &mut self,
        store: &S,
        machine: &MachineId,
    ) -> Result<bool, CoreError> {
        if self.members.contains(machine) {
            return Ok(false);
        }
        store
            .set_field(&self.key, &ref_field(reference::MEMBER, machine.as_str()), 1)
            .await?;
        self.members.insert(machine.clone());
        Ok(true)
    }

    /// Remove a member. Returns `false` if it was not one.
    pub async fn remove_member<S: FieldStore>(
        &mut self,
        store: &S,
        machine: &MachineId,
    ) -> Result<bool, CoreError> {
        if !self.members.contains(machine) {
            return Ok(false);
        }
        store
            .remove_field(&self.key, &ref_field(reference::MEMBER, machine.as_str()))
            .await?;
        self.members.remove(machine);
        Ok(true)
    }

    pub(crate) async fn set_head<S: FieldStore>(
        &mut self,
        store: &S,
        head: Option<MachineId>,
    ) -> Result<(), CoreError> {
        replace_ref(
            store,
            &self.key,
            reference::HEAD,
            self.head.as_ref().map(MachineId::as_str),
            head.as_ref().map(MachineId::as_str),
        )
        .await?;
        self.head = head;
        Ok(())
    }

    pub(crate) async fn set_last<S: FieldStore>(
        &mut self,
        store: &S,
        last: Option<MachineId>,
    ) -> Result<(), CoreError> {
        replace_ref(
            store,
            &self.key,
            reference::LAST,
            self.last.as_ref().map(MachineId::as_str),
            last.as_ref().map(MachineId::as_str),
        )
        .await?;
        self.last = last;
        Ok(())
    }

    /// Delete the network record.
    pub async fn destroy<S: FieldStore>(self, store: &S) -> Result<(), CoreError> {
        store.delete_group(&self.key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fluxgrid_store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn membership_round_trips_through_store() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut network = Network::create(&store, NetworkId::new("n1"), 7).await?;
        assert!(network.add_member(&store, &MachineId::new("a")).await?);
        assert!(!network.add_member(&store, &MachineId::new("a")).await?);
        network.add_member(&store, &MachineId::new("b")).await?;
        network.set_head(&store, Some(MachineId::new("a"))).await?;
        network.set_last(&store, Some(MachineId::new("b"))).await?;

        let record = Record::load(&store, "network:n1").await?;
        let loaded = Network::rehydrate(NetworkId::new("n1"), &record);
        assert_eq!(loaded, network);
        assert_eq!(loaded.created(), 7);

        assert!(network.remove_member(&store, &MachineId::new("a")).await?);
        assert!(!network.remove_member(&store, &MachineId::new("a")).await?);
        assert_eq!(network.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn destroy_removes_group() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let network = Network::create(&store, NetworkId::new("n1"), 1).await?;
        network.destroy(&store).await?;
        assert!(!store.group_exists("network:n1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn larger_then_older_then_smaller_id_wins() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut big = Network::create(&store, NetworkId::new("z"), 9).await?;
        big.add_member(&store, &MachineId::new("a")).await?;
        big.add_member(&store, &MachineId::new("b")).await?;
        let mut old = Network::create(&store, NetworkId::new("y"), 1).await?;
        old.add_member(&store, &MachineId::new("c")).await?;
        let mut new = Network::create(&store, NetworkId::new("x"), 5).await?;
        new.add_member(&store, &MachineId::new("d")).await?;

        assert!(big.outranks(&old));
        assert!(!old.outranks(&big));
        assert!(old.outranks(&new));
        assert!(!new.outranks(&old));

        let mut twin = Network::create(&store, NetworkId::new("w"), 5).await?;
        twin.add_member(&store, &MachineId::new("e")).await?;
        assert!(twin.outranks(&new));
        assert!(!new.outranks(&twin));
        Ok(())
    }
}
