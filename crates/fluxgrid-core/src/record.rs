//! Typed view over a persisted field group.
//!
//! A [`Record`] is a snapshot of one group read in a single call. Fields that
//! were never written read as their documented zero value: quantities as `0`,
//! references as absent.

use std::collections::BTreeMap;

use fluxgrid_store::schema::{ref_field, strip_ref};
use fluxgrid_store::{FieldStore, StoreError};
use fluxgrid_types::Energy;

/// Snapshot of one persisted group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, i32>,
}

impl Record {
    /// Read every field of `key`.
    pub async fn load<S: FieldStore>(store: &S, key: &str) -> Result<Self, StoreError> {
        Ok(Self {
            fields: store.fields(key).await?,
        })
    }

    /// Whether the group had no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw field value.
    pub fn get(&self, name: &str) -> Option<i32> {
        self.fields.get(name).copied()
    }

    /// Non-negative quantity; absent or negative values read as `0`.
    pub fn quantity(&self, name: &str) -> Energy {
        self.get(name)
            .and_then(|v| Energy::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Every reference field under `prefix` with its value.
    pub fn refs<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, i32)> + 'a {
        self.fields
            .iter()
            .filter_map(move |(name, value)| strip_ref(prefix, name).map(|target| (target, *value)))
    }

    /// The first reference under `prefix`, for single-valued references.
    pub fn first_ref<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        self.fields.keys().find_map(|name| strip_ref(prefix, name))
    }
}

/// Move a single-valued reference from `old` to `new`.
///
/// The new reference is written before the old one is removed so the group
/// never reads as unreferenced in between.
pub async fn replace_ref<S: FieldStore>(
    store: &S,
    key: &str,
    prefix: &str,
    old: Option<&str>,
    new: Option<&str>,
) -> Result<(), StoreError> {
    if old == new {
        return Ok(());
    }
    if let Some(target) = new {
        store.set_field(key, &ref_field(prefix, target), 1).await?;
    }
    if let Some(target) = old {
        store.remove_field(key, &ref_field(prefix, target)).await?;
    }
    Ok(())
}
