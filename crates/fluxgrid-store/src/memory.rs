//! In-process [`FieldStore`] backend.
//!
//! [`MemoryStore`] keeps every group in a shared map. Clones share the same
//! map, so dropping an engine and reopening it over a clone behaves like a
//! process restart against a durable store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;
use crate::store::{FieldStore, checked_field_value};

type Groups = BTreeMap<String, BTreeMap<String, i32>>;

/// Shared in-memory field store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    groups: Arc<Mutex<Groups>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups currently held.
    pub fn group_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Groups>, StoreError> {
        self.groups.lock().map_err(|_err| StoreError::Poisoned)
    }
}

impl FieldStore for MemoryStore {
    async fn ensure_group(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.entry(key.to_owned()).or_default();
        Ok(())
    }

    async fn set_field(&self, key: &str, name: &str, value: i64) -> Result<(), StoreError> {
        let value = checked_field_value(key, name, value)?;
        self.lock()?
            .entry(key.to_owned())
            .or_default()
            .insert(name.to_owned(), value);
        Ok(())
    }

    async fn get_field(&self, key: &str, name: &str) -> Result<Option<i32>, StoreError> {
        Ok(self
            .lock()?
            .get(key)
            .and_then(|fields| fields.get(name))
            .copied())
    }

    async fn remove_field(&self, key: &str, name: &str) -> Result<(), StoreError> {
        if let Some(fields) = self.lock()?.get_mut(key) {
            fields.remove(name);
        }
        Ok(())
    }

    async fn delete_group(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn group_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn list_groups(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn list_fields(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .get(key)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn fields(&self, key: &str) -> Result<BTreeMap<String, i32>, StoreError> {
        Ok(self.lock()?.get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_group_is_idempotent() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.ensure_group("g").await?;
        store.set_field("g", "a", 5).await?;
        store.ensure_group("g").await?;
        assert_eq!(store.get_field("g", "a").await?, Some(5));
        assert!(store.group_exists("g").await?);
        assert_eq!(store.group_count()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unwritten_fields_read_as_absent() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        assert_eq!(store.get_field("missing", "a").await?, None);
        assert!(store.list_fields("missing").await?.is_empty());
        assert!(store.fields("missing").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_write_leaves_field_untouched() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.set_field("g", "a", 7).await?;
        let result = store.set_field("g", "a", i64::MAX).await;
        assert!(matches!(result, Err(StoreError::ValueOutOfRange { .. })));
        assert_eq!(store.get_field("g", "a").await?, Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_list() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.set_field("a", "x", 1).await?;
        store.set_field("a", "y", 2).await?;
        store.set_field("b", "x", 3).await?;
        assert_eq!(store.list_groups().await?, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(store.list_fields("a").await?, vec!["x".to_owned(), "y".to_owned()]);

        store.remove_field("a", "x").await?;
        assert_eq!(store.list_fields("a").await?, vec!["y".to_owned()]);

        store.delete_group("a").await?;
        assert!(!store.group_exists("a").await?);
        assert_eq!(store.list_groups().await?, vec!["b".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn clones_share_state() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set_field("g", "a", 9).await?;
        assert_eq!(other.get_field("g", "a").await?, Some(9));
        Ok(())
    }
}
