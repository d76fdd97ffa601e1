//! Location- and id-keyed cache over machine records.
//!
//! The directory is a pure latency optimization: with caching disabled every
//! lookup goes to the store, and callers observe the same results. With
//! caching enabled, [`Directory::rebuild`] warms both maps from a full scan,
//! after which the location index is authoritative and scans stop.

use std::collections::{BTreeMap, HashMap};

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema::{self, MACHINE_PREFIX};
use fluxgrid_types::{Location, MachineId};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::machine::Machine;
use crate::record::Record;

/// Machine cache with a location secondary index.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    caching: bool,
    warm: bool,
    machines: BTreeMap<MachineId, Machine>,
    by_location: HashMap<Location, MachineId>,
}

impl Directory {
    /// Create a directory. `caching = false` forwards every lookup to the store.
    pub fn new(caching: bool) -> Self {
        Self {
            caching,
            ..Self::default()
        }
    }

    /// Whether lookups are served from memory.
    pub const fn is_caching(&self) -> bool {
        self.caching
    }

    /// Number of cached machines.
    pub fn cached_len(&self) -> usize {
        self.machines.len()
    }

    /// Current copy of machine `id`, or `None` if no record exists.
    pub async fn get<S: FieldStore>(
        &mut self,
        store: &S,
        id: &MachineId,
    ) -> Result<Option<Machine>, CoreError> {
        if let Some(machine) = self.machines.get(id) {
            return Ok(Some(machine.clone()));
        }
        let loaded = Machine::load(store, id).await?;
        if let Some(machine) = &loaded {
            debug!(machine = %id, "directory miss served from store");
            self.commit(machine);
        }
        Ok(loaded)
    }

    /// Id of the machine at `location`, if any.
    pub async fn find_at<S: FieldStore>(
        &mut self,
        store: &S,
        location: Location,
    ) -> Result<Option<MachineId>, CoreError> {
        if self.caching {
            if let Some(id) = self.by_location.get(&location) {
                return Ok(Some(id.clone()));
            }
            if self.warm {
                return Ok(None);
            }
        }
        let found = Self::scan(store)
            .await?
            .into_iter()
            .find(|machine| machine.location() == location);
        Ok(found.map(|machine| {
            let id = machine.id().clone();
            self.commit(&machine);
            id
        }))
    }

    /// Record the latest copy of a machine.
    pub fn commit(&mut self, machine: &Machine) {
        if !self.caching {
            return;
        }
        self.by_location
            .insert(machine.location(), machine.id().clone());
        self.machines.insert(machine.id().clone(), machine.clone());
    }

    /// Forget machine `id` and its location entry.
    pub fn evict(&mut self, id: &MachineId) {
        let Some(machine) = self.machines.remove(id) else {
            return;
        };
        if self.by_location.get(&machine.location()) == Some(id) {
            self.by_location.remove(&machine.location());
        }
    }

    /// Reload every machine record from the store.
    ///
    /// Returns the number of machines found.
    pub async fn rebuild<S: FieldStore>(&mut self, store: &S) -> Result<usize, CoreError> {
        self.machines.clear();
        self.by_location.clear();
        let machines = Self::scan(store).await?;
        let count = machines.len();
        for machine in &machines {
            self.commit(machine);
        }
        self.warm = self.caching;
        info!(machines = count, caching = self.caching, "machine directory rebuilt");
        Ok(count)
    }

    /// Ids of every machine, ascending.
    pub async fn machine_ids<S: FieldStore>(
        &self,
        store: &S,
    ) -> Result<Vec<MachineId>, CoreError> {
        if self.caching && self.warm {
            return Ok(self.machines.keys().cloned().collect());
        }
        let mut ids: Vec<MachineId> = store
            .list_groups()
            .await?
            .iter()
            .filter_map(|key| schema::machine_id_from_key(key))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Read and rehydrate every machine group, ordered by id.
    ///
    /// Groups under the machine prefix that lack coordinates are skipped.
    pub async fn scan<S: FieldStore>(store: &S) -> Result<Vec<Machine>, CoreError> {
        let mut keys: Vec<String> = store
            .list_groups()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(MACHINE_PREFIX))
            .collect();
        keys.sort();

        let mut machines = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(id) = schema::machine_id_from_key(&key) else {
                continue;
            };
            let record = Record::load(store, &key).await?;
            match Machine::rehydrate(id, &record) {
                Some(machine) => machines.push(machine),
                None => debug!(key = %key, "skipping machine group without coordinates"),
            }
        }
        Ok(machines)
    }
}

#[cfg(test)]
mod tests {
    use fluxgrid_store::MemoryStore;
    use fluxgrid_types::MachineSpec;

    use super::*;
    use crate::machine::MachineBuilder;

    async fn persist(store: &MemoryStore, id: &str, x: i32) -> Result<Machine, CoreError> {
        let request = MachineBuilder::new()
            .type_key("cell")
            .location(Location::new(x, 0, 0, 0))
            .spec(MachineSpec::new(0, 10, 0, 1));
        Machine::persist_new(store, MachineId::new(id), &request).await
    }

    #[tokio::test]
    async fn cold_lookup_scans_then_caches() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        persist(&store, "a", 3).await?;
        let mut directory = Directory::new(true);

        let found = directory.find_at(&store, Location::new(3, 0, 0, 0)).await?;
        assert_eq!(found, Some(MachineId::new("a")));
        assert_eq!(directory.cached_len(), 1);
        assert_eq!(
            directory.find_at(&store, Location::new(4, 0, 0, 0)).await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn warm_index_is_authoritative() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        persist(&store, "a", 0).await?;
        let mut directory = Directory::new(true);
        assert_eq!(directory.rebuild(&store).await?, 1);

        // Written behind the directory's back: a warm index does not see it.
        persist(&store, "b", 1).await?;
        assert_eq!(
            directory.find_at(&store, Location::new(1, 0, 0, 0)).await?,
            None
        );
        assert!(directory.get(&store, &MachineId::new("b")).await?.is_some());
        assert_eq!(
            directory.find_at(&store, Location::new(1, 0, 0, 0)).await?,
            Some(MachineId::new("b"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn bypass_mode_always_reads_store() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut directory = Directory::new(false);
        directory.rebuild(&store).await?;
        persist(&store, "a", 0).await?;

        assert_eq!(
            directory.find_at(&store, Location::new(0, 0, 0, 0)).await?,
            Some(MachineId::new("a"))
        );
        assert_eq!(directory.cached_len(), 0);
        assert_eq!(directory.machine_ids(&store).await?, vec![MachineId::new("a")]);
        Ok(())
    }

    #[tokio::test]
    async fn evict_clears_both_maps() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let machine = persist(&store, "a", 0).await?;
        let mut directory = Directory::new(true);
        directory.rebuild(&store).await?;
        directory.commit(&machine);

        directory.evict(machine.id());
        assert_eq!(directory.cached_len(), 0);
        assert_eq!(
            directory.find_at(&store, Location::new(0, 0, 0, 0)).await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn scan_skips_groups_without_coordinates() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        store.set_field("machine:ghost", "energy", 5).await?;
        persist(&store, "real", 0).await?;
        let machines = Directory::scan(&store).await?;
        assert_eq!(machines.len(), 1);
        Ok(())
    }
}
