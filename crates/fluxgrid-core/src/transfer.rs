//! Point-to-point energy transfer.
//!
//! A transfer moves `min(rate, source energy, target capacity)` and conserves
//! the sum of both endpoints. Both writes land before the call returns; if the
//! second one fails the first is rolled back, so no half-applied transfer is
//! ever persisted.

use fluxgrid_store::FieldStore;
use fluxgrid_types::{Energy, MachineId};
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::CoreError;
use crate::machine::Machine;

/// Totals of one linked-transfer pass over a machine's links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkedTransfer {
    /// Energy moved across all links.
    pub moved: u64,
    /// Links that moved a non-zero amount.
    pub transfers: u32,
}

/// Move up to `rate` energy from `source` into `target`.
///
/// Returns the amount moved. Self-transfer moves nothing.
pub async fn transfer_energy<S: FieldStore>(
    store: &S,
    source: &mut Machine,
    target: &mut Machine,
    rate: Energy,
) -> Result<Energy, CoreError> {
    if source.id() == target.id() {
        return Ok(0);
    }
    let moved = rate.min(source.energy()).min(target.capacity());
    if moved == 0 {
        return Ok(0);
    }

    let source_before = source.energy();
    source
        .set_energy(store, source_before.saturating_sub(moved))
        .await?;
    if let Err(err) = target
        .set_energy(store, target.energy().saturating_add(moved))
        .await
    {
        if let Err(rollback) = source.set_energy(store, source_before).await {
            warn!(
                source = %source.id(),
                error = %rollback,
                "failed to roll back transfer source"
            );
        }
        return Err(err);
    }

    debug!(source = %source.id(), target = %target.id(), moved, "energy transferred");
    Ok(moved)
}

/// Push energy from `source` along each outgoing link at its transfer rate.
///
/// Links are served by priority (highest first), then by target id. Links to
/// machines that no longer exist are skipped.
pub async fn transfer_to_linked<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    source: &MachineId,
) -> Result<LinkedTransfer, CoreError> {
    let mut totals = LinkedTransfer::default();
    let Some(mut origin) = directory.get(store, source).await? else {
        return Ok(totals);
    };

    for (target_id, _priority) in origin.links_by_priority() {
        if origin.energy() == 0 {
            break;
        }
        let Some(mut target) = directory.get(store, &target_id).await? else {
            debug!(source = %source, target = %target_id, "skipping link to missing machine");
            continue;
        };
        let rate = origin.transfer_rate();
        let moved = transfer_energy(store, &mut origin, &mut target, rate).await?;
        if moved > 0 {
            directory.commit(&origin);
            directory.commit(&target);
            totals.moved = totals.moved.saturating_add(u64::from(moved));
            totals.transfers = totals.transfers.saturating_add(1);
        }
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fluxgrid_store::{MemoryStore, StoreError};
    use fluxgrid_types::{Location, MachineSpec};

    use super::*;
    use crate::machine::MachineBuilder;

    async fn machine(
        store: &MemoryStore,
        directory: &mut Directory,
        id: &str,
        max: Energy,
        energy: Energy,
        rate: Energy,
    ) -> Result<Machine, CoreError> {
        let x = i32::try_from(directory.cached_len()).unwrap_or_default();
        let request = MachineBuilder::new()
            .type_key("cell")
            .location(Location::new(x, 0, 0, 0))
            .spec(MachineSpec::new(1, max, energy, rate));
        let machine = Machine::persist_new(store, MachineId::new(id), &request).await?;
        directory.commit(&machine);
        Ok(machine)
    }

    #[tokio::test]
    async fn moves_min_of_rate_energy_and_capacity() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let mut a = machine(&store, &mut directory, "a", 100, 50, 10).await?;
        let mut b = machine(&store, &mut directory, "b", 30, 25, 10).await?;

        // Capacity bound.
        assert_eq!(transfer_energy(&store, &mut a, &mut b, 10).await?, 5);
        assert_eq!(a.energy().checked_add(b.energy()), Some(75));
        assert_eq!(b.energy(), 30);

        // Full target moves nothing.
        assert_eq!(transfer_energy(&store, &mut a, &mut b, 10).await?, 0);

        // Source bound.
        let mut c = machine(&store, &mut directory, "c", 100, 3, 10).await?;
        let mut d = machine(&store, &mut directory, "d", 100, 0, 10).await?;
        assert_eq!(transfer_energy(&store, &mut c, &mut d, 10).await?, 3);
        assert_eq!((c.energy(), d.energy()), (0, 3));

        // Rate bound.
        assert_eq!(transfer_energy(&store, &mut a, &mut d, 4).await?, 4);
        assert_eq!(store.get_field("machine:d", "energy").await?, Some(7));
        assert_eq!(store.get_field("machine:a", "energy").await?, Some(41));
        Ok(())
    }

    /// Memory store that refuses every write to one group.
    struct RefusingStore {
        inner: MemoryStore,
        refused: String,
    }

    impl FieldStore for RefusingStore {
        async fn ensure_group(&self, key: &str) -> Result<(), StoreError> {
            self.inner.ensure_group(key).await
        }

        async fn set_field(&self, key: &str, name: &str, value: i64) -> Result<(), StoreError> {
            if key == self.refused {
                return Err(StoreError::Config(format!("write to {key} refused")));
            }
            self.inner.set_field(key, name, value).await
        }

        async fn get_field(&self, key: &str, name: &str) -> Result<Option<i32>, StoreError> {
            self.inner.get_field(key, name).await
        }

        async fn remove_field(&self, key: &str, name: &str) -> Result<(), StoreError> {
            self.inner.remove_field(key, name).await
        }

        async fn delete_group(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete_group(key).await
        }

        async fn group_exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.group_exists(key).await
        }

        async fn list_groups(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_groups().await
        }

        async fn list_fields(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_fields(key).await
        }

        async fn fields(&self, key: &str) -> Result<BTreeMap<String, i32>, StoreError> {
            self.inner.fields(key).await
        }
    }

    #[tokio::test]
    async fn failed_target_write_rolls_back_source() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let mut a = machine(&store, &mut directory, "a", 100, 50, 10).await?;
        let mut b = machine(&store, &mut directory, "b", 100, 5, 10).await?;
        let refusing = RefusingStore {
            inner: store.clone(),
            refused: "machine:b".to_owned(),
        };

        let result = transfer_energy(&refusing, &mut a, &mut b, 10).await;
        assert!(matches!(
            result,
            Err(CoreError::Store(StoreError::Config(_)))
        ));

        assert_eq!((a.energy(), b.energy()), (50, 5));
        assert_eq!(store.get_field("machine:a", "energy").await?, Some(50));
        assert_eq!(store.get_field("machine:b", "energy").await?, Some(5));

        // Writes succeed again once the group is accepted.
        assert_eq!(transfer_energy(&store, &mut a, &mut b, 10).await?, 10);
        assert_eq!((a.energy(), b.energy()), (40, 15));
        Ok(())
    }

    #[tokio::test]
    async fn self_transfer_is_a_no_op() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let mut a = machine(&store, &mut directory, "a", 100, 50, 10).await?;
        let mut twin = a.clone();
        assert_eq!(transfer_energy(&store, &mut a, &mut twin, 10).await?, 0);
        assert_eq!(a.energy(), 50);
        Ok(())
    }

    #[tokio::test]
    async fn linked_scenario_moves_one_rate() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let mut m1 = machine(&store, &mut directory, "m1", 30, 30, 10).await?;
        machine(&store, &mut directory, "m2", 30, 0, 10).await?;
        m1.link(&store, &MachineId::new("m2"), 1).await?;
        directory.commit(&m1);

        let totals = transfer_to_linked(&store, &mut directory, &MachineId::new("m1")).await?;
        assert_eq!(totals, LinkedTransfer { moved: 10, transfers: 1 });

        let m1 = directory.get(&store, &MachineId::new("m1")).await?;
        let m2 = directory.get(&store, &MachineId::new("m2")).await?;
        assert_eq!(m1.map(|m| m.energy()), Some(20));
        assert_eq!(m2.map(|m| m.energy()), Some(10));
        Ok(())
    }

    #[tokio::test]
    async fn linked_transfer_follows_priority_and_skips_missing() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let mut hub = machine(&store, &mut directory, "hub", 100, 15, 10).await?;
        machine(&store, &mut directory, "low", 100, 0, 0).await?;
        machine(&store, &mut directory, "high", 100, 0, 0).await?;
        hub.link(&store, &MachineId::new("low"), 1).await?;
        hub.link(&store, &MachineId::new("high"), 5).await?;
        hub.link(&store, &MachineId::new("gone"), 9).await?;
        directory.commit(&hub);

        let totals = transfer_to_linked(&store, &mut directory, &MachineId::new("hub")).await?;
        assert_eq!(totals, LinkedTransfer { moved: 15, transfers: 2 });

        let high = directory.get(&store, &MachineId::new("high")).await?;
        let low = directory.get(&store, &MachineId::new("low")).await?;
        assert_eq!(high.map(|m| m.energy()), Some(10));
        assert_eq!(low.map(|m| m.energy()), Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_moves_nothing() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(true);
        let totals = transfer_to_linked(&store, &mut directory, &MachineId::new("nobody")).await?;
        assert_eq!(totals, LinkedTransfer::default());
        Ok(())
    }
}
