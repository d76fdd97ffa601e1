//! The machine entity: a node holding a bounded amount of energy.
//!
//! A [`Machine`] is an in-memory copy of the record stored under
//! `machine:{id}`. Every mutation writes the store first and updates the copy
//! only after the write succeeded, so the two never diverge.
//!
//! New machines are made by [`crate::Grid::create_machine`] from a validated
//! [`MachineBuilder`]; existing ones are loaded with [`Machine::rehydrate`].
//! The two paths are never mixed.
//!
//! Writes are crate-private: callers outside the crate change machines
//! through [`crate::Grid`], which commits every new copy to the directory.

use std::collections::BTreeMap;

use fluxgrid_store::schema::{self, field, ref_field, reference};
use fluxgrid_store::{FieldStore, checked_field_value};
use fluxgrid_types::{Energy, Location, MachineId, MachineSpec, NetworkId};
use tracing::debug;

use crate::error::CoreError;
use crate::record::{Record, replace_ref};

/// Default link priority.
pub const DEFAULT_PRIORITY: u32 = 1;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for machine creation requests.
///
/// Location and type key are required; quantities default to zero.
///
/// # Examples
///
/// ```
/// use fluxgrid_core::machine::MachineBuilder;
/// use fluxgrid_types::{Location, MachineSpec};
///
/// let request = MachineBuilder::new()
///     .type_key("generator")
///     .location(Location::new(0, 64, 0, 0))
///     .spec(MachineSpec::new(0, 100, 100, 10));
///
/// assert!(request.validate().is_ok());
/// assert!(MachineBuilder::new().type_key("generator").validate().is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineBuilder {
    id: Option<MachineId>,
    type_key: Option<String>,
    location: Option<Location>,
    spec: MachineSpec,
}

impl MachineBuilder {
    /// Start an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen identifier instead of allocating one.
    #[must_use]
    pub fn id(mut self, id: MachineId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the external type key.
    #[must_use]
    pub fn type_key(mut self, type_key: impl Into<String>) -> Self {
        self.type_key = Some(type_key.into());
        self
    }

    /// Set the location.
    #[must_use]
    pub const fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Take all four quantities from a type's defaults.
    #[must_use]
    pub const fn spec(mut self, spec: MachineSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Set the energy consumed per run.
    #[must_use]
    pub const fn energy_cost(mut self, value: Energy) -> Self {
        self.spec.energy_cost = value;
        self
    }

    /// Set the capacity.
    #[must_use]
    pub const fn max_energy(mut self, value: Energy) -> Self {
        self.spec.max_energy = value;
        self
    }

    /// Set the starting energy (clamped to the capacity).
    #[must_use]
    pub const fn start_energy(mut self, value: Energy) -> Self {
        self.spec.start_energy = value;
        self
    }

    /// Set the default transfer rate.
    #[must_use]
    pub const fn transfer_rate(mut self, value: Energy) -> Self {
        self.spec.transfer_rate = value;
        self
    }

    /// The caller-chosen identifier, if any.
    pub const fn requested_id(&self) -> Option<&MachineId> {
        self.id.as_ref()
    }

    /// Check required fields and return the type key and location.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the type key or location is
    /// missing, or the type key or supplied id is empty.
    pub fn validate(&self) -> Result<(&str, Location), CoreError> {
        let type_key = self
            .type_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidArgument("missing machine type key".to_owned()))?;
        let location = self
            .location
            .ok_or_else(|| CoreError::InvalidArgument("missing machine location".to_owned()))?;
        if self.id.as_ref().is_some_and(|id| id.as_str().is_empty()) {
            return Err(CoreError::InvalidArgument("empty machine id".to_owned()));
        }
        Ok((type_key, location))
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// A node that stores and consumes energy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    id: MachineId,
    key: String,
    type_key: String,
    location: Location,
    energy_cost: Energy,
    max_energy: Energy,
    energy: Energy,
    transfer_rate: Energy,
    links: BTreeMap<MachineId, u32>,
    network: Option<NetworkId>,
    next: Option<MachineId>,
}

impl Machine {
    /// Write a brand-new machine record and return its in-memory copy.
    ///
    /// All quantities are range-checked before the first write, so an
    /// out-of-range request leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the request is incomplete,
    /// [`CoreError::ValueOutOfRange`] if a quantity exceeds the field bound.
    pub(crate) async fn persist_new<S: FieldStore>(
        store: &S,
        id: MachineId,
        request: &MachineBuilder,
    ) -> Result<Self, CoreError> {
        let (type_key, location) = request.validate()?;
        let spec = request.spec;
        let key = schema::machine_key(&id);
        let start = spec.start_energy.min(spec.max_energy);

        let quantities = [
            (field::ENERGY_COST, spec.energy_cost),
            (field::MAX_ENERGY, spec.max_energy),
            (field::ENERGY, start),
            (field::TRANSFER_RATE, spec.transfer_rate),
        ];
        for (name, value) in quantities {
            checked_field_value(&key, name, i64::from(value))?;
        }

        store.ensure_group(&key).await?;
        store.set_field(&key, field::X, i64::from(location.x)).await?;
        store.set_field(&key, field::Y, i64::from(location.y)).await?;
        store.set_field(&key, field::Z, i64::from(location.z)).await?;
        store
            .set_field(&key, field::DIMENSION, i64::from(location.dimension))
            .await?;
        store
            .set_field(&key, &ref_field(reference::TYPE, type_key), 1)
            .await?;
        for (name, value) in quantities {
            store.set_field(&key, name, i64::from(value)).await?;
        }

        Ok(Self {
            id,
            key,
            type_key: type_key.to_owned(),
            location,
            energy_cost: spec.energy_cost,
            max_energy: spec.max_energy,
            energy: start,
            transfer_rate: spec.transfer_rate,
            links: BTreeMap::new(),
            network: None,
            next: None,
        })
    }

    /// Rebuild a machine from its stored record.
    ///
    /// Returns `None` if the record lacks coordinates (not a machine).
    /// A stored energy above the capacity reads as the capacity.
    pub fn rehydrate(id: MachineId, record: &Record) -> Option<Self> {
        let location = Location::new(
            record.get(field::X)?,
            record.get(field::Y)?,
            record.get(field::Z)?,
            record.get(field::DIMENSION)?,
        );
        let max_energy = record.quantity(field::MAX_ENERGY);
        let links = record
            .refs(reference::LINK)
            .map(|(target, priority)| {
                (
                    MachineId::from(target),
                    u32::try_from(priority).unwrap_or(0),
                )
            })
            .collect();

        Some(Self {
            key: schema::machine_key(&id),
            id,
            type_key: record.first_ref(reference::TYPE).unwrap_or_default().to_owned(),
            location,
            energy_cost: record.quantity(field::ENERGY_COST),
            max_energy,
            energy: record.quantity(field::ENERGY).min(max_energy),
            transfer_rate: record.quantity(field::TRANSFER_RATE),
            links,
            network: record.first_ref(reference::NETWORK).map(NetworkId::from),
            next: record.first_ref(reference::NEXT).map(MachineId::from),
        })
    }

    /// Load and rehydrate the machine stored under `id`.
    pub async fn load<S: FieldStore>(store: &S, id: &MachineId) -> Result<Option<Self>, CoreError> {
        let record = Record::load(store, &schema::machine_key(id)).await?;
        if record.is_empty() {
            return Ok(None);
        }
        Ok(Self::rehydrate(id.clone(), &record))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Identifier.
    pub const fn id(&self) -> &MachineId {
        &self.id
    }

    /// Store group key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// External type key.
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Location.
    pub const fn location(&self) -> Location {
        self.location
    }

    /// Energy consumed per run.
    pub const fn energy_cost(&self) -> Energy {
        self.energy_cost
    }

    /// Capacity.
    pub const fn max_energy(&self) -> Energy {
        self.max_energy
    }

    /// Current energy.
    pub const fn energy(&self) -> Energy {
        self.energy
    }

    /// Room left below the capacity.
    pub const fn capacity(&self) -> Energy {
        self.max_energy.saturating_sub(self.energy)
    }

    /// Default transfer rate.
    pub const fn transfer_rate(&self) -> Energy {
        self.transfer_rate
    }

    /// Outgoing links and their priorities.
    pub const fn links(&self) -> &BTreeMap<MachineId, u32> {
        &self.links
    }

    /// Outgoing links ordered by priority (highest first), then target id.
    pub fn links_by_priority(&self) -> Vec<(MachineId, u32)> {
        let mut ordered: Vec<(MachineId, u32)> = self
            .links
            .iter()
            .map(|(target, priority)| (target.clone(), *priority))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }

    /// Owning network, if any.
    pub const fn network(&self) -> Option<&NetworkId> {
        self.network.as_ref()
    }

    /// Chain successor, if any.
    pub const fn next(&self) -> Option<&MachineId> {
        self.next.as_ref()
    }

    // -----------------------------------------------------------------------
    // Energy
    // -----------------------------------------------------------------------

    /// Write `value` as the current energy. Callers keep it within capacity.
    pub(crate) async fn set_energy<S: FieldStore>(
        &mut self,
        store: &S,
        value: Energy,
    ) -> Result<(), CoreError> {
        if value == self.energy {
            return Ok(());
        }
        store
            .set_field(&self.key, field::ENERGY, i64::from(value))
            .await?;
        self.energy = value;
        Ok(())
    }

    /// Consume the run cost if enough energy is stored.
    ///
    /// Returns `false` without touching anything when energy is short.
    pub(crate) async fn run<S: FieldStore>(&mut self, store: &S) -> Result<bool, CoreError> {
        let Some(remaining) = self.energy.checked_sub(self.energy_cost) else {
            debug!(machine = %self.id, energy = self.energy, cost = self.energy_cost, "run refused");
            return Ok(false);
        };
        self.set_energy(store, remaining).await?;
        Ok(true)
    }

    /// Add up to `amount`, stopping at the capacity. Returns what was added.
    pub(crate) async fn add_energy<S: FieldStore>(
        &mut self,
        store: &S,
        amount: Energy,
    ) -> Result<Energy, CoreError> {
        let applied = amount.min(self.capacity());
        if applied == 0 {
            return Ok(0);
        }
        self.set_energy(store, self.energy.saturating_add(applied))
            .await?;
        Ok(applied)
    }

    /// Remove up to `amount`, stopping at zero. Returns what was removed.
    pub(crate) async fn remove_energy<S: FieldStore>(
        &mut self,
        store: &S,
        amount: Energy,
    ) -> Result<Energy, CoreError> {
        let applied = amount.min(self.energy);
        if applied == 0 {
            return Ok(0);
        }
        self.set_energy(store, self.energy.saturating_sub(applied))
            .await?;
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Add or re-weight a directed link. Self-links are refused (`false`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValueOutOfRange`] if `priority` exceeds the field
    /// bound.
    pub(crate) async fn link<S: FieldStore>(
        &mut self,
        store: &S,
        target: &MachineId,
        priority: u32,
    ) -> Result<bool, CoreError> {
        if *target == self.id {
            debug!(machine = %self.id, "self-link ignored");
            return Ok(false);
        }
        store
            .set_field(
                &self.key,
                &ref_field(reference::LINK, target.as_str()),
                i64::from(priority),
            )
            .await?;
        self.links.insert(target.clone(), priority);
        Ok(true)
    }

    /// Remove a directed link. Returns `false` if it did not exist.
    pub(crate) async fn unlink<S: FieldStore>(
        &mut self,
        store: &S,
        target: &MachineId,
    ) -> Result<bool, CoreError> {
        if !self.links.contains_key(target) {
            return Ok(false);
        }
        store
            .remove_field(&self.key, &ref_field(reference::LINK, target.as_str()))
            .await?;
        self.links.remove(target);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Topology back-references (owned by formation and chain code)
    // -----------------------------------------------------------------------

    pub(crate) async fn set_network<S: FieldStore>(
        &mut self,
        store: &S,
        network: Option<NetworkId>,
    ) -> Result<(), CoreError> {
        replace_ref(
            store,
            &self.key,
            reference::NETWORK,
            self.network.as_ref().map(NetworkId::as_str),
            network.as_ref().map(NetworkId::as_str),
        )
        .await?;
        self.network = network;
        Ok(())
    }

    pub(crate) async fn set_next<S: FieldStore>(
        &mut self,
        store: &S,
        next: Option<MachineId>,
    ) -> Result<(), CoreError> {
        replace_ref(
            store,
            &self.key,
            reference::NEXT,
            self.next.as_ref().map(MachineId::as_str),
            next.as_ref().map(MachineId::as_str),
        )
        .await?;
        self.next = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fluxgrid_store::MemoryStore;

    use super::*;

    async fn make(store: &MemoryStore, id: &str, spec: MachineSpec) -> Result<Machine, CoreError> {
        let request = MachineBuilder::new()
            .type_key("cell")
            .location(Location::new(0, 0, 0, 0))
            .spec(spec);
        Machine::persist_new(store, MachineId::new(id), &request).await
    }

    #[test]
    fn builder_requires_location_and_type() {
        let missing_location = MachineBuilder::new().type_key("cell");
        assert!(matches!(
            missing_location.validate(),
            Err(CoreError::InvalidArgument(_))
        ));
        let missing_type = MachineBuilder::new().location(Location::new(0, 0, 0, 0));
        assert!(matches!(
            missing_type.validate(),
            Err(CoreError::InvalidArgument(_))
        ));
        let empty_id = MachineBuilder::new()
            .type_key("cell")
            .location(Location::new(0, 0, 0, 0))
            .id(MachineId::new(""));
        assert!(empty_id.validate().is_err());
    }

    #[tokio::test]
    async fn persist_then_rehydrate_matches() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut machine = make(&store, "m1", MachineSpec::new(1, 30, 12, 10)).await?;
        machine.link(&store, &MachineId::new("m2"), 5).await?;

        let loaded = Machine::load(&store, &MachineId::new("m1")).await?;
        assert_eq!(loaded.as_ref(), Some(&machine));
        if let Some(loaded) = loaded {
            assert_eq!(loaded.type_key(), "cell");
            assert_eq!(loaded.energy(), 12);
            assert_eq!(loaded.links().get(&MachineId::new("m2")), Some(&5));
        }
        Ok(())
    }

    #[tokio::test]
    async fn start_energy_is_clamped() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let machine = make(&store, "m1", MachineSpec::new(0, 10, 50, 0)).await?;
        assert_eq!(machine.energy(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_quantity_leaves_no_record() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let result = make(&store, "big", MachineSpec::new(0, u32::MAX, 0, 0)).await;
        assert!(matches!(result, Err(CoreError::ValueOutOfRange { .. })));
        assert!(!store.group_exists("machine:big").await?);
        Ok(())
    }

    #[tokio::test]
    async fn run_gates_on_cost() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut machine = make(&store, "m1", MachineSpec::new(1, 30, 0, 10)).await?;
        assert!(!machine.run(&store).await?);
        assert_eq!(machine.energy(), 0);

        machine.add_energy(&store, 2).await?;
        assert!(machine.run(&store).await?);
        assert_eq!(machine.energy(), 1);
        assert_eq!(store.get_field("machine:m1", "energy").await?, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn add_and_remove_clamp_and_persist() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut machine = make(&store, "m1", MachineSpec::new(0, 30, 25, 10)).await?;

        assert_eq!(machine.add_energy(&store, 10).await?, 5);
        assert_eq!(machine.energy(), 30);
        assert_eq!(machine.add_energy(&store, 10).await?, 0);
        assert_eq!(machine.add_energy(&store, 0).await?, 0);

        assert_eq!(machine.remove_energy(&store, 40).await?, 30);
        assert_eq!(machine.energy(), 0);
        assert_eq!(machine.remove_energy(&store, 1).await?, 0);
        assert_eq!(store.get_field("machine:m1", "energy").await?, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn self_link_rejected_and_unlink_persists() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut machine = make(&store, "m1", MachineSpec::new(0, 30, 0, 10)).await?;
        assert!(!machine.link(&store, &MachineId::new("m1"), 1).await?);
        assert!(machine.links().is_empty());

        assert!(machine.link(&store, &MachineId::new("m2"), 1).await?);
        assert!(machine.unlink(&store, &MachineId::new("m2")).await?);
        assert!(!machine.unlink(&store, &MachineId::new("m2")).await?);
        assert_eq!(store.get_field("machine:m1", "link:m2").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn links_order_by_priority_then_id() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut machine = make(&store, "m0", MachineSpec::new(0, 30, 0, 10)).await?;
        machine.link(&store, &MachineId::new("c"), 1).await?;
        machine.link(&store, &MachineId::new("a"), 1).await?;
        machine.link(&store, &MachineId::new("b"), 9).await?;
        let order: Vec<String> = machine
            .links_by_priority()
            .into_iter()
            .map(|(id, _)| id.into_inner())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn stored_energy_above_capacity_reads_clamped() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        make(&store, "m1", MachineSpec::new(0, 30, 0, 10)).await?;
        store.set_field("machine:m1", "energy", 99).await?;
        let loaded = Machine::load(&store, &MachineId::new("m1")).await?;
        assert_eq!(loaded.map(|m| m.energy()), Some(30));
        Ok(())
    }

    #[test]
    fn record_without_coordinates_is_not_a_machine() {
        let record = Record::default();
        assert!(Machine::rehydrate(MachineId::new("x"), &record).is_none());
    }
}
