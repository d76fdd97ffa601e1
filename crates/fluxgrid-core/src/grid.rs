//! The grid context object.
//!
//! A [`Grid`] owns the store handle and every in-memory table built over it:
//! the identifier allocator, the machine directory, the network registry, the
//! type catalog, and the tick scheduler. Every public entry point of the
//! engine is a method on it; there is no process-wide state.
//!
//! Network formation lives in [`crate::formation`] and the tick loop in
//! [`crate::scheduler`]; both add methods to [`Grid`].

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema;
use fluxgrid_types::{Energy, Location, MachineId, MachineSpec, NetworkId};
use tracing::{debug, info};

use crate::allocator::IdAllocator;
use crate::catalog::MachineCatalog;
use crate::chain;
use crate::config::GridConfig;
use crate::directory::Directory;
use crate::error::CoreError;
use crate::machine::{Machine, MachineBuilder};
use crate::network::Network;
use crate::registry::NetworkRegistry;
use crate::scheduler::TickScheduler;
use crate::transfer::{self, LinkedTransfer};

/// Counts reported by [`Grid::rebuild`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Machine records loaded.
    pub machines: usize,
    /// Live networks loaded.
    pub networks: usize,
}

/// The energy grid: machines, networks, and the scheduler over a store.
#[derive(Debug)]
pub struct Grid<S> {
    pub(crate) store: S,
    pub(crate) allocator: IdAllocator,
    pub(crate) directory: Directory,
    pub(crate) networks: NetworkRegistry,
    pub(crate) catalog: MachineCatalog,
    pub(crate) scheduler: TickScheduler,
}

impl<S: FieldStore> Grid<S> {
    /// Open a grid over `store` and rebuild every table from it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid scheduler or
    /// machine type configuration, or a store error from the rebuild.
    pub async fn open(store: S, config: &GridConfig) -> Result<Self, CoreError> {
        let mut grid = Self {
            store,
            allocator: IdAllocator::new(config.allocator.max_attempts),
            directory: Directory::new(config.directory.cache),
            networks: NetworkRegistry::new(),
            catalog: MachineCatalog::new(),
            scheduler: TickScheduler::from_config(&config.scheduler)?,
        };
        for (type_key, spec) in &config.machine_types {
            grid.catalog.register(type_key, *spec)?;
        }
        grid.rebuild().await?;
        Ok(grid)
    }

    /// Open a grid with the default configuration.
    pub async fn with_defaults(store: S) -> Result<Self, CoreError> {
        Self::open(store, &GridConfig::default()).await
    }

    /// Replace the identifier allocator.
    pub fn set_allocator(&mut self, allocator: IdAllocator) {
        self.allocator = allocator;
    }

    /// Reload the directory and registry from the store.
    ///
    /// Every loaded id is reserved with the allocator and the scheduler
    /// cursor starts over.
    pub async fn rebuild(&mut self) -> Result<RebuildStats, CoreError> {
        let machines = self.directory.rebuild(&self.store).await?;
        let networks = self.networks.rebuild(&self.store).await?;

        for id in self.directory.machine_ids(&self.store).await? {
            self.allocator.reserve(id.as_str());
        }
        for id in self.networks.ids() {
            self.allocator.reserve(id.as_str());
        }
        self.scheduler.reset();

        info!(machines, networks, "grid rebuilt from store");
        Ok(RebuildStats { machines, networks })
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register or replace the defaults for a machine type.
    pub fn register_type(
        &mut self,
        type_key: &str,
        spec: MachineSpec,
    ) -> Result<Option<MachineSpec>, CoreError> {
        let previous = self.catalog.register(type_key, spec)?;
        debug!(type_key, replaced = previous.is_some(), "machine type registered");
        Ok(previous)
    }

    /// Whether `type_key` is registered.
    pub fn is_registered(&self, type_key: &str) -> bool {
        self.catalog.is_registered(type_key)
    }

    /// The machine type catalog.
    pub const fn catalog(&self) -> &MachineCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Host events
    // -----------------------------------------------------------------------

    /// A node of `type_key` appeared at `location`.
    ///
    /// Unregistered types are ignored (`Ok(None)`). A registered type creates
    /// the machine (or finds the one already there) and connects it to its
    /// neighbors.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an empty type key.
    pub async fn on_node_appeared(
        &mut self,
        type_key: &str,
        location: Location,
    ) -> Result<Option<MachineId>, CoreError> {
        if type_key.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "machine type key must not be empty".to_owned(),
            ));
        }
        let Some(spec) = self.catalog.get(type_key) else {
            debug!(type_key, %location, "ignoring unregistered node type");
            return Ok(None);
        };
        let request = MachineBuilder::new()
            .type_key(type_key)
            .location(location)
            .spec(spec);
        let id = self.create_machine(&request).await?;
        self.connect_adjacent(&id).await?;
        Ok(Some(id))
    }

    /// The node at `location` went away. Returns the deleted machine, if any.
    pub async fn on_node_removed(
        &mut self,
        location: Location,
    ) -> Result<Option<MachineId>, CoreError> {
        let Some(id) = self.directory.find_at(&self.store, location).await? else {
            return Ok(None);
        };
        self.delete_machine(&id).await?;
        Ok(Some(id))
    }

    // -----------------------------------------------------------------------
    // Machine lifecycle
    // -----------------------------------------------------------------------

    /// Create a machine, or return the one already at the requested location.
    ///
    /// The new machine is not connected to its neighbors; see
    /// [`Grid::connect_adjacent`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an incomplete request or a
    /// requested id already in use, [`CoreError::ValueOutOfRange`] for a
    /// quantity the store cannot hold.
    pub async fn create_machine(&mut self, request: &MachineBuilder) -> Result<MachineId, CoreError> {
        let (type_key, location) = request.validate()?;
        if let Some(existing) = self.directory.find_at(&self.store, location).await? {
            debug!(machine = %existing, %location, "machine already present at location");
            return Ok(existing);
        }

        let id = match request.requested_id() {
            Some(id) => {
                let taken = self
                    .store
                    .group_exists(&schema::machine_key(id))
                    .await?;
                if taken || !self.allocator.reserve(id.as_str()) {
                    return Err(CoreError::InvalidArgument(format!(
                        "machine id {id} is already in use"
                    )));
                }
                id.clone()
            }
            None => self.allocator.allocate_machine(&self.store).await?,
        };

        let machine = match Machine::persist_new(&self.store, id.clone(), request).await {
            Ok(machine) => machine,
            Err(err) => {
                self.allocator.free(id.as_str());
                return Err(err);
            }
        };
        self.directory.commit(&machine);
        info!(machine = %id, type_key, %location, "machine created");
        Ok(id)
    }

    /// Delete a machine, detaching it from its network first.
    ///
    /// Returns `false` if the machine does not exist.
    pub async fn delete_machine(&mut self, id: &MachineId) -> Result<bool, CoreError> {
        let Some(machine) = self.directory.get(&self.store, id).await? else {
            return Ok(false);
        };
        let successor = machine.next().cloned();
        if let Some(network) = self.find_network(id).await? {
            self.remove_machine(&network, id).await?;
        }
        self.scheduler.forget_machine(id, successor);

        self.store.delete_group(machine.key()).await?;
        self.directory.evict(id);
        self.allocator.free(id.as_str());
        info!(machine = %id, location = %machine.location(), "machine deleted");
        Ok(true)
    }

    /// Current copy of machine `id`.
    pub async fn machine(&mut self, id: &MachineId) -> Result<Option<Machine>, CoreError> {
        self.directory.get(&self.store, id).await
    }

    /// The machine at `location`.
    pub async fn machine_at(&mut self, location: Location) -> Result<Option<Machine>, CoreError> {
        match self.directory.find_at(&self.store, location).await? {
            Some(id) => self.directory.get(&self.store, &id).await,
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Energy
    // -----------------------------------------------------------------------

    /// Run machine `id` once. `None` if it does not exist.
    pub async fn run(&mut self, id: &MachineId) -> Result<Option<bool>, CoreError> {
        let Some(mut machine) = self.directory.get(&self.store, id).await? else {
            return Ok(None);
        };
        let ran = machine.run(&self.store).await?;
        self.directory.commit(&machine);
        Ok(Some(ran))
    }

    /// Add energy to machine `id`. Returns the amount applied.
    pub async fn add_energy(
        &mut self,
        id: &MachineId,
        amount: Energy,
    ) -> Result<Option<Energy>, CoreError> {
        let Some(mut machine) = self.directory.get(&self.store, id).await? else {
            return Ok(None);
        };
        let applied = machine.add_energy(&self.store, amount).await?;
        self.directory.commit(&machine);
        Ok(Some(applied))
    }

    /// Remove energy from machine `id`. Returns the amount applied.
    pub async fn remove_energy(
        &mut self,
        id: &MachineId,
        amount: Energy,
    ) -> Result<Option<Energy>, CoreError> {
        let Some(mut machine) = self.directory.get(&self.store, id).await? else {
            return Ok(None);
        };
        let applied = machine.remove_energy(&self.store, amount).await?;
        self.directory.commit(&machine);
        Ok(Some(applied))
    }

    /// Move energy from `source` to `target`.
    ///
    /// `rate` defaults to the source's transfer rate. `None` if either
    /// machine does not exist.
    pub async fn transfer_energy(
        &mut self,
        source: &MachineId,
        target: &MachineId,
        rate: Option<Energy>,
    ) -> Result<Option<Energy>, CoreError> {
        let Some(mut from) = self.directory.get(&self.store, source).await? else {
            return Ok(None);
        };
        if source == target {
            return Ok(Some(0));
        }
        let Some(mut to) = self.directory.get(&self.store, target).await? else {
            return Ok(None);
        };
        let rate = rate.unwrap_or_else(|| from.transfer_rate());
        let moved = transfer::transfer_energy(&self.store, &mut from, &mut to, rate).await?;
        self.directory.commit(&from);
        self.directory.commit(&to);
        Ok(Some(moved))
    }

    /// Push energy from `source` along all its outgoing links.
    pub async fn transfer_to_linked(
        &mut self,
        source: &MachineId,
    ) -> Result<Option<LinkedTransfer>, CoreError> {
        if self.directory.get(&self.store, source).await?.is_none() {
            return Ok(None);
        }
        transfer::transfer_to_linked(&self.store, &mut self.directory, source)
            .await
            .map(Some)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Link `source` to `target` and join their networks.
    ///
    /// Returns `false` for a self-link or when either machine is missing.
    pub async fn link(
        &mut self,
        source: &MachineId,
        target: &MachineId,
        priority: u32,
    ) -> Result<bool, CoreError> {
        if self.directory.get(&self.store, target).await?.is_none() {
            return Ok(false);
        }
        let Some(mut machine) = self.directory.get(&self.store, source).await? else {
            return Ok(false);
        };
        if !machine.link(&self.store, target, priority).await? {
            return Ok(false);
        }
        self.directory.commit(&machine);
        self.join(source, target).await?;
        Ok(true)
    }

    /// Remove the link from `source` to `target`.
    ///
    /// If both share a network it is split when no other connection remains.
    pub async fn unlink(&mut self, source: &MachineId, target: &MachineId) -> Result<bool, CoreError> {
        let Some(mut machine) = self.directory.get(&self.store, source).await? else {
            return Ok(false);
        };
        if !machine.unlink(&self.store, target).await? {
            return Ok(false);
        }
        self.directory.commit(&machine);

        let source_network = self.find_network(source).await?;
        if let Some(network) = source_network {
            if self.find_network(target).await?.as_ref() == Some(&network) {
                self.split_if_disconnected(&network).await?;
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Networks
    // -----------------------------------------------------------------------

    /// Network `id`, if live.
    pub fn network(&self, id: &NetworkId) -> Option<&Network> {
        self.networks.get(id)
    }

    /// Every live network in id order.
    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter()
    }

    /// Number of live networks.
    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// Chain order of network `id` as far as it can be walked.
    pub async fn chain_order(&mut self, id: &NetworkId) -> Result<Option<Vec<MachineId>>, CoreError> {
        let Some(network) = self.networks.get(id) else {
            return Ok(None);
        };
        let walk = chain::walk(&self.store, &mut self.directory, network).await?;
        Ok(Some(walk.order))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The machine directory.
    pub const fn directory(&self) -> &Directory {
        &self.directory
    }

    /// The tick scheduler.
    pub const fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Mutable access to the tick scheduler.
    pub const fn scheduler_mut(&mut self) -> &mut TickScheduler {
        &mut self.scheduler
    }
}
