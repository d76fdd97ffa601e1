//! Network formation, merge, and split.
//!
//! Networks form lazily when machines appear next to each other or get
//! linked, never by background scanning. Two networks that touch merge into
//! one: the larger absorbs the smaller, ties going to the older network.
//! When a member leaves, the remaining members are re-checked over adjacency
//! and links; every disconnected piece becomes its own network.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema;
use fluxgrid_types::{Location, MachineId, NetworkId};
use tracing::{debug, info, warn};

use crate::chain;
use crate::error::CoreError;
use crate::grid::Grid;
use crate::network::Network;
use crate::registry;

/// What one adjacency discovery changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyReport {
    /// The machine's network after discovery.
    pub network: Option<NetworkId>,
    /// Merges performed.
    pub merged: u32,
    /// Networks created.
    pub created: u32,
    /// Machines attached to an existing network.
    pub attached: u32,
    /// Whether the resulting chain had to be rebuilt.
    pub repaired: bool,
}

impl AdjacencyReport {
    /// Whether discovery left the topology unchanged.
    pub const fn is_unchanged(&self) -> bool {
        self.merged == 0 && self.created == 0 && self.attached == 0 && !self.repaired
    }
}

/// Result of connecting two machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Both already shared a network.
    Unchanged,
    /// Two networks became the given one.
    Merged(NetworkId),
    /// One machine joined the other's network.
    Attached(NetworkId),
    /// A new network was created for both.
    Created(NetworkId),
}

impl<S: FieldStore> Grid<S> {
    /// The network holding `machine`, if any.
    ///
    /// The machine's back-reference is trusted only if the registry agrees.
    pub async fn find_network(&mut self, machine: &MachineId) -> Result<Option<NetworkId>, CoreError> {
        if let Some(current) = self.directory.get(&self.store, machine).await? {
            if let Some(network) = current.network() {
                if self
                    .networks
                    .get(network)
                    .is_some_and(|candidate| candidate.contains(machine))
                {
                    return Ok(Some(network.clone()));
                }
            }
        }
        Ok(self.networks.find_containing(machine))
    }

    /// Connect `machine` with every machine on its six faces.
    ///
    /// Re-running discovery on an unchanged topology is a no-op.
    pub async fn connect_adjacent(&mut self, machine: &MachineId) -> Result<AdjacencyReport, CoreError> {
        let mut report = AdjacencyReport::default();
        let Some(origin) = self.directory.get(&self.store, machine).await? else {
            return Ok(report);
        };

        for location in origin.location().neighbors() {
            let Some(neighbor) = self.directory.find_at(&self.store, location).await? else {
                continue;
            };
            if neighbor == *machine {
                continue;
            }
            match self.join(machine, &neighbor).await? {
                JoinOutcome::Unchanged => {}
                JoinOutcome::Merged(_) => report.merged = report.merged.saturating_add(1),
                JoinOutcome::Attached(_) => report.attached = report.attached.saturating_add(1),
                JoinOutcome::Created(_) => report.created = report.created.saturating_add(1),
            }
        }

        report.network = self.find_network(machine).await?;
        if let Some(network) = &report.network {
            report.repaired = self.repair_network(network).await?;
        }
        if !report.is_unchanged() {
            debug!(machine = %machine, ?report, "adjacency discovery");
        }
        Ok(report)
    }

    /// Put `a` and `b` in the same network.
    pub async fn join(&mut self, a: &MachineId, b: &MachineId) -> Result<JoinOutcome, CoreError> {
        if a == b {
            return Ok(JoinOutcome::Unchanged);
        }
        let left = self.find_network(a).await?;
        let right = self.find_network(b).await?;
        match (left, right) {
            (Some(x), Some(y)) if x == y => Ok(JoinOutcome::Unchanged),
            (Some(x), Some(y)) => self.merge(&x, &y).await.map(JoinOutcome::Merged),
            (Some(x), None) => {
                self.attach(&x, b).await?;
                Ok(JoinOutcome::Attached(x))
            }
            (None, Some(y)) => {
                self.attach(&y, a).await?;
                Ok(JoinOutcome::Attached(y))
            }
            (None, None) => {
                let network = self.create_network(a).await?;
                self.attach(&network, a).await?;
                self.attach(&network, b).await?;
                Ok(JoinOutcome::Created(network))
            }
        }
    }

    /// Merge two networks. Returns the survivor.
    ///
    /// Membership of the result is the union regardless of argument order.
    /// The absorbed chain is appended, in order, after the survivor's tail.
    pub async fn merge(&mut self, x: &NetworkId, y: &NetworkId) -> Result<NetworkId, CoreError> {
        let x_survives = match (self.networks.get(x), self.networks.get(y)) {
            (Some(left), Some(right)) => left.outranks(right),
            (Some(_), None) => return Ok(x.clone()),
            (None, _) => return Ok(y.clone()),
        };
        let (survivor, absorbed) = if x_survives { (x, y) } else { (y, x) };
        let Some(absorbed_network) = self.networks.remove(absorbed) else {
            return Ok(survivor.clone());
        };

        let order = self.chain_then_members(&absorbed_network).await?;
        for member in &order {
            self.attach(survivor, member).await?;
        }
        absorbed_network.destroy(&self.store).await?;
        self.allocator.free(absorbed.as_str());

        info!(
            survivor = %survivor,
            absorbed = %absorbed,
            moved = order.len(),
            "networks merged"
        );
        Ok(survivor.clone())
    }

    /// Remove `machine` from `network`, destroying the network if it empties
    /// and splitting whatever is left into connected pieces.
    ///
    /// Returns the networks created by the split.
    pub async fn remove_machine(
        &mut self,
        network: &NetworkId,
        machine: &MachineId,
    ) -> Result<Vec<NetworkId>, CoreError> {
        if self.detach(network, machine).await? {
            return Ok(Vec::new());
        }
        self.split_if_disconnected(network).await
    }

    /// Split `network` into its connected components.
    ///
    /// The largest component keeps the network (ties go to the one holding
    /// the earliest chain element); every other component, singletons
    /// included, becomes a new network. Returns the new networks.
    pub async fn split_if_disconnected(&mut self, network: &NetworkId) -> Result<Vec<NetworkId>, CoreError> {
        let Some(snapshot) = self.networks.get(network).cloned() else {
            return Ok(Vec::new());
        };
        let order = self.chain_then_members(&snapshot).await?;
        let components = self.components(&order).await?;
        if components.len() <= 1 {
            return Ok(Vec::new());
        }

        let keeper = components
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then_with(|| ib.cmp(ia)))
            .map_or(0, |(index, _)| index);

        let mut created = Vec::new();
        for (index, component) in components.iter().enumerate() {
            if index == keeper {
                continue;
            }
            for member in component {
                self.detach(network, member).await?;
            }
            let Some(seed) = component.first() else {
                continue;
            };
            let fresh = self.create_network(seed).await?;
            for member in component {
                self.attach(&fresh, member).await?;
            }
            created.push(fresh);
        }

        info!(network = %network, pieces = components.len(), "network split");
        Ok(created)
    }

    /// Rebuild the chain of `network` if it does not visit every member once.
    ///
    /// Returns whether a repair happened.
    pub async fn repair_network(&mut self, id: &NetworkId) -> Result<bool, CoreError> {
        let Some(network) = self.networks.get_mut(id) else {
            return Ok(false);
        };
        let walk = chain::walk(&self.store, &mut self.directory, network).await?;
        if walk.is_consistent(network) {
            return Ok(false);
        }
        warn!(
            network = %id,
            reached = walk.order.len(),
            members = network.len(),
            fault = ?walk.fault,
            "repairing inconsistent chain"
        );
        chain::repair(&self.store, &mut self.directory, network).await?;
        if network.is_empty() {
            self.destroy_network(id).await?;
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Create an empty network named after `seed`, or a fresh id if taken.
    async fn create_network(&mut self, seed: &MachineId) -> Result<NetworkId, CoreError> {
        let derived = NetworkId::derived_from(seed);
        let taken = self.networks.contains(&derived)
            || self.allocator.is_reserved(derived.as_str())
            || self
                .store
                .group_exists(&schema::network_key(&derived))
                .await?;
        let id = if taken {
            self.allocator.allocate_network(&self.store).await?
        } else {
            self.allocator.reserve(derived.as_str());
            derived
        };

        let created = registry::next_sequence(&self.store).await?;
        let network = Network::create(&self.store, id.clone(), created).await?;
        self.networks.insert(network);
        info!(network = %id, seed = %seed, created, "network created");
        Ok(id)
    }

    /// Add `machine` to `network` and append it to the chain.
    async fn attach(&mut self, network: &NetworkId, machine: &MachineId) -> Result<bool, CoreError> {
        let Some(mut member) = self.directory.get(&self.store, machine).await? else {
            warn!(network = %network, machine = %machine, "cannot attach missing machine");
            return Ok(false);
        };
        let Some(target) = self.networks.get_mut(network) else {
            return Ok(false);
        };
        if !target.add_member(&self.store, machine).await? {
            return Ok(false);
        }
        member.set_network(&self.store, Some(network.clone())).await?;
        self.directory.commit(&member);
        chain::append(&self.store, &mut self.directory, target, machine).await?;
        Ok(true)
    }

    /// Take `machine` out of `network`. Returns whether the network was
    /// destroyed because it emptied.
    async fn detach(&mut self, network: &NetworkId, machine: &MachineId) -> Result<bool, CoreError> {
        let Some(source) = self.networks.get_mut(network) else {
            return Ok(false);
        };
        chain::remove(&self.store, &mut self.directory, source, machine).await?;
        source.remove_member(&self.store, machine).await?;
        let emptied = source.is_empty();

        if let Some(mut member) = self.directory.get(&self.store, machine).await? {
            if member.network() == Some(network) {
                member.set_network(&self.store, None).await?;
                self.directory.commit(&member);
            }
        }
        if emptied {
            self.destroy_network(network).await?;
        }
        Ok(emptied)
    }

    async fn destroy_network(&mut self, id: &NetworkId) -> Result<(), CoreError> {
        if let Some(network) = self.networks.remove(id) {
            network.destroy(&self.store).await?;
            self.allocator.free(id.as_str());
            info!(network = %id, "network destroyed");
        }
        Ok(())
    }

    /// Chain order of `network` followed by members the chain misses.
    async fn chain_then_members(&mut self, network: &Network) -> Result<Vec<MachineId>, CoreError> {
        let walk = chain::walk(&self.store, &mut self.directory, network).await?;
        let mut order = walk.order;
        let reached: HashSet<MachineId> = order.iter().cloned().collect();
        order.extend(
            network
                .members()
                .iter()
                .filter(|member| !reached.contains(*member))
                .cloned(),
        );
        Ok(order)
    }

    /// Connected components of `order` over adjacency and links (either
    /// direction). Components and their members follow `order`.
    async fn components(&mut self, order: &[MachineId]) -> Result<Vec<Vec<MachineId>>, CoreError> {
        let mut machines = Vec::with_capacity(order.len());
        for id in order {
            if let Some(machine) = self.directory.get(&self.store, id).await? {
                machines.push(machine);
            }
        }
        let by_location: HashMap<Location, &MachineId> = machines
            .iter()
            .map(|machine| (machine.location(), machine.id()))
            .collect();
        let members: HashSet<&MachineId> = machines.iter().map(|machine| machine.id()).collect();

        let mut edges: HashMap<&MachineId, BTreeSet<&MachineId>> = HashMap::new();
        for machine in &machines {
            let adjacent = machine
                .location()
                .neighbors()
                .into_iter()
                .filter_map(|location| by_location.get(&location).copied());
            let linked = machine
                .links()
                .keys()
                .filter(|target| members.contains(*target));
            for other in adjacent.chain(linked) {
                edges.entry(machine.id()).or_default().insert(other);
                edges.entry(other).or_default().insert(machine.id());
            }
        }

        let position: HashMap<&MachineId, usize> =
            order.iter().enumerate().map(|(index, id)| (id, index)).collect();
        let mut seen: HashSet<&MachineId> = HashSet::new();
        let mut components = Vec::new();
        for machine in &machines {
            if !seen.insert(machine.id()) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([machine.id()]);
            while let Some(current) = queue.pop_front() {
                if let Some(next) = edges.get(current) {
                    for other in next {
                        if seen.insert(*other) {
                            queue.push_back(*other);
                        }
                    }
                }
                component.push(current.clone());
            }
            component.sort_by_key(|id| position.get(id).copied());
            components.push(component);
        }
        Ok(components)
    }
}
