//! `Dragonfly` (Redis-compatible) [`FieldStore`] backend.
//!
//! Each group is a Redis hash. Because Redis drops empty hashes, group
//! existence is tracked separately in an index set so that a group created by
//! [`FieldStore::ensure_group`] survives before its first field is written.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `fluxgrid:groups` | Set | Every group key |
//! | `{group}` | Hash | Field name to integer value |

use std::collections::{BTreeMap, HashMap};

use fred::prelude::*;

use crate::error::StoreError;
use crate::store::{FieldStore, checked_field_value};

/// Index set holding every group key.
const GROUP_INDEX: &str = "fluxgrid:groups";

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and maps the group/field contract onto
/// hashes plus an index set.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Delete every group tracked by the index, then the index itself.
    ///
    /// **WARNING:** This deletes all engine data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if a delete fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for key in self.list_groups().await? {
            let _: u32 = self.client.del(key.as_str()).await?;
        }
        let _: u32 = self.client.del(GROUP_INDEX).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl FieldStore for DragonflyStore {
    async fn ensure_group(&self, key: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.sadd(GROUP_INDEX, key).await?;
        Ok(())
    }

    async fn set_field(&self, key: &str, name: &str, value: i64) -> Result<(), StoreError> {
        let value = checked_field_value(key, name, value)?;
        let _: u32 = self.client.sadd(GROUP_INDEX, key).await?;
        let _: u32 = self.client.hset(key, (name, i64::from(value))).await?;
        Ok(())
    }

    async fn get_field(&self, key: &str, name: &str) -> Result<Option<i32>, StoreError> {
        let value: Option<i64> = self.client.hget(key, name).await?;
        // Values outside i32 can only appear if another writer bypassed the
        // range check; they read as absent.
        Ok(value.and_then(|v| i32::try_from(v).ok()))
    }

    async fn remove_field(&self, key: &str, name: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.hdel(key, name).await?;
        Ok(())
    }

    async fn delete_group(&self, key: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.del(key).await?;
        let _: u32 = self.client.srem(GROUP_INDEX, key).await?;
        Ok(())
    }

    async fn group_exists(&self, key: &str) -> Result<bool, StoreError> {
        let member: bool = self.client.sismember(GROUP_INDEX, key).await?;
        Ok(member)
    }

    async fn list_groups(&self) -> Result<Vec<String>, StoreError> {
        let mut groups: Vec<String> = self.client.smembers(GROUP_INDEX).await?;
        groups.sort();
        Ok(groups)
    }

    async fn list_fields(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.client.hkeys(key).await?;
        names.sort();
        Ok(names)
    }

    async fn fields(&self, key: &str) -> Result<BTreeMap<String, i32>, StoreError> {
        let raw: HashMap<String, i64> = self.client.hgetall(key).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(name, v)| i32::try_from(v).ok().map(|v| (name, v)))
            .collect())
    }
}
