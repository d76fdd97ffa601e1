//! Process-unique identifier allocation.
//!
//! Candidates come from an [`IdSource`] (random UUID v4 text by default) and
//! are rejected while they are reserved in this process or already name a
//! group in the store. Collisions are retried up to a configured limit.

use std::collections::BTreeSet;

use fluxgrid_store::FieldStore;
use fluxgrid_store::schema::{MACHINE_PREFIX, NETWORK_PREFIX};
use fluxgrid_types::{MachineId, NetworkId};
use tracing::debug;

use crate::error::CoreError;

/// Supplier of candidate identifier tokens.
pub trait IdSource: Send {
    /// Produce the next candidate.
    fn next_token(&mut self) -> String;
}

/// Random UUID v4 text candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSource;

impl IdSource for UuidSource {
    fn next_token(&mut self) -> String {
        MachineId::random().into_inner()
    }
}

/// Collision-checked identifier allocator.
pub struct IdAllocator {
    source: Box<dyn IdSource>,
    reserved: BTreeSet<String>,
    max_attempts: u32,
}

impl IdAllocator {
    /// Create an allocator drawing random UUIDs.
    pub fn new(max_attempts: u32) -> Self {
        Self::with_source(Box::new(UuidSource), max_attempts)
    }

    /// Create an allocator drawing from a custom source.
    pub fn with_source(source: Box<dyn IdSource>, max_attempts: u32) -> Self {
        Self {
            source,
            reserved: BTreeSet::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Allocate a fresh token whose group `{prefix}{token}` does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AllocationExhausted`] if every attempt collided,
    /// or a store error if the existence check fails.
    pub async fn allocate<S: FieldStore>(
        &mut self,
        store: &S,
        prefix: &str,
    ) -> Result<String, CoreError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.source.next_token();
            if candidate.is_empty() || self.reserved.contains(&candidate) {
                debug!(attempt, "identifier candidate already reserved, retrying");
                continue;
            }
            if store.group_exists(&format!("{prefix}{candidate}")).await? {
                debug!(attempt, "identifier candidate collides with stored group, retrying");
                continue;
            }
            self.reserved.insert(candidate.clone());
            return Ok(candidate);
        }
        Err(CoreError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Allocate a fresh machine identifier.
    pub async fn allocate_machine<S: FieldStore>(
        &mut self,
        store: &S,
    ) -> Result<MachineId, CoreError> {
        self.allocate(store, MACHINE_PREFIX).await.map(MachineId::from)
    }

    /// Allocate a fresh network identifier.
    pub async fn allocate_network<S: FieldStore>(
        &mut self,
        store: &S,
    ) -> Result<NetworkId, CoreError> {
        self.allocate(store, NETWORK_PREFIX).await.map(NetworkId::from)
    }

    /// Reserve a caller-supplied token. Returns `false` if already reserved.
    pub fn reserve(&mut self, token: &str) -> bool {
        self.reserved.insert(token.to_owned())
    }

    /// Release a reservation. Returns `false` if it was not reserved.
    pub fn free(&mut self, token: &str) -> bool {
        self.reserved.remove(token)
    }

    /// Whether `token` is currently reserved.
    pub fn is_reserved(&self, token: &str) -> bool {
        self.reserved.contains(token)
    }

    /// Number of live reservations.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }
}

impl core::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("reserved", &self.reserved.len())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use fluxgrid_store::MemoryStore;

    use super::*;

    /// Replays scripted tokens, then repeats the last one.
    struct Scripted(VecDeque<String>, String);

    impl Scripted {
        fn boxed(tokens: &[&str]) -> Box<dyn IdSource> {
            let queue: VecDeque<String> = tokens.iter().map(|t| (*t).to_owned()).collect();
            let last = tokens.last().map(|t| (*t).to_owned()).unwrap_or_default();
            Box::new(Self(queue, last))
        }
    }

    impl IdSource for Scripted {
        fn next_token(&mut self) -> String {
            self.0.pop_front().unwrap_or_else(|| self.1.clone())
        }
    }

    #[tokio::test]
    async fn uuid_allocation_reserves() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut allocator = IdAllocator::new(4);
        let a = allocator.allocate_machine(&store).await?;
        let b = allocator.allocate_machine(&store).await?;
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert!(allocator.is_reserved(a.as_str()));
        assert_eq!(allocator.reserved_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn stored_collision_is_retried() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        store.ensure_group("machine:taken").await?;
        let mut allocator = IdAllocator::with_source(Scripted::boxed(&["taken", "free"]), 4);
        let id = allocator.allocate_machine(&store).await?;
        assert_eq!(id.as_str(), "free");
        Ok(())
    }

    #[tokio::test]
    async fn reserved_collision_is_retried() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut allocator = IdAllocator::with_source(Scripted::boxed(&["a", "a", "b"]), 4);
        assert_eq!(allocator.allocate(&store, "machine:").await?, "a");
        assert_eq!(allocator.allocate(&store, "machine:").await?, "b");
        Ok(())
    }

    #[tokio::test]
    async fn exhaustion_is_reported() {
        let store = MemoryStore::new();
        let mut allocator = IdAllocator::with_source(Scripted::boxed(&["same"]), 3);
        assert!(allocator.allocate(&store, "machine:").await.is_ok());
        let result = allocator.allocate(&store, "machine:").await;
        assert!(matches!(
            result,
            Err(CoreError::AllocationExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn freed_tokens_can_be_reissued() -> Result<(), CoreError> {
        let store = MemoryStore::new();
        let mut allocator = IdAllocator::with_source(Scripted::boxed(&["x"]), 2);
        let first = allocator.allocate(&store, "machine:").await?;
        assert!(allocator.free(&first));
        assert!(!allocator.free(&first));
        assert_eq!(allocator.allocate(&store, "machine:").await?, "x");
        Ok(())
    }
}
