//! Ordered chain threaded through a network's members.
//!
//! Each member's `next` points at its successor; the network holds the
//! `head` and `last` endpoints. Walking the chain never trusts it: a visited
//! set stops cycles, and a pointer that leaves the member set or names a
//! missing machine ends the walk with a [`ChainFault`].

use std::collections::HashSet;

use fluxgrid_store::FieldStore;
use fluxgrid_types::MachineId;
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::CoreError;
use crate::network::Network;

/// Why a walk did not cover the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    /// The chain came back to a machine it already visited.
    Revisit(MachineId),
    /// A pointer names a machine with no stored record.
    Dangling(MachineId),
    /// A pointer names a machine outside the member set.
    Stray(MachineId),
    /// The chain ended before every member was reached.
    Truncated {
        /// Members reached before the unset pointer.
        reached: usize,
        /// Members of the network.
        members: usize,
    },
}

impl core::fmt::Display for ChainFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Revisit(id) => write!(f, "chain revisits {id}"),
            Self::Dangling(id) => write!(f, "chain points at missing machine {id}"),
            Self::Stray(id) => write!(f, "chain leaves the network at {id}"),
            Self::Truncated { reached, members } => {
                write!(f, "chain ends after {reached} of {members} members")
            }
        }
    }
}

/// Result of walking a chain from its head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainWalk {
    /// Machines reached, in chain order.
    pub order: Vec<MachineId>,
    /// Why the walk stopped early, if it did.
    pub fault: Option<ChainFault>,
}

impl ChainWalk {
    /// Whether the walk reached every member exactly once and ended at `last`.
    pub fn is_consistent(&self, network: &Network) -> bool {
        self.fault.is_none()
            && self.order.len() == network.len()
            && self.order.last() == network.last()
    }
}

/// Walk the chain of `network` from its head.
pub async fn walk<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    network: &Network,
) -> Result<ChainWalk, CoreError> {
    let mut walk = ChainWalk::default();
    let mut visited = HashSet::new();
    let mut cursor = network.head().cloned();

    while let Some(id) = cursor {
        if visited.contains(&id) {
            walk.fault = Some(ChainFault::Revisit(id));
            break;
        }
        if !network.contains(&id) {
            walk.fault = Some(ChainFault::Stray(id));
            break;
        }
        let Some(machine) = directory.get(store, &id).await? else {
            walk.fault = Some(ChainFault::Dangling(id));
            break;
        };
        cursor = machine.next().cloned();
        visited.insert(id.clone());
        walk.order.push(id);
    }
    Ok(walk)
}

/// Append `machine` after the current tail.
pub async fn append<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    network: &mut Network,
    machine: &MachineId,
) -> Result<(), CoreError> {
    clear_next(store, directory, machine).await?;

    match network.last().cloned() {
        None => {
            network.set_head(store, Some(machine.clone())).await?;
        }
        Some(tail) if tail == *machine => return Ok(()),
        Some(tail) => {
            if let Some(mut previous) = directory.get(store, &tail).await? {
                previous.set_next(store, Some(machine.clone())).await?;
                directory.commit(&previous);
            }
        }
    }
    network.set_last(store, Some(machine.clone())).await
}

async fn clear_next<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    machine: &MachineId,
) -> Result<(), CoreError> {
    if let Some(mut stale) = directory.get(store, machine).await? {
        if stale.next().is_some() {
            stale.set_next(store, None).await?;
            directory.commit(&stale);
        }
    }
    Ok(())
}

/// Splice `machine` out of the chain.
///
/// Returns `false` if the walk from the head never reached it. The machine's
/// own pointer is cleared either way, and a `last` that named it is moved to
/// the last element the walk did reach. If the walk stopped at the machine
/// because its record is gone, the pointer naming it is cleared too.
pub async fn remove<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    network: &mut Network,
    machine: &MachineId,
) -> Result<bool, CoreError> {
    let mut visited = HashSet::new();
    let mut previous: Option<MachineId> = None;
    let mut cursor = network.head().cloned();
    let mut found = None;
    let mut missing = None;

    while let Some(id) = cursor {
        if !visited.insert(id.clone()) {
            break;
        }
        let Some(current) = directory.get(store, &id).await? else {
            missing = Some(id);
            break;
        };
        if id == *machine {
            found = Some(current);
            break;
        }
        cursor = current.next().cloned();
        previous = Some(id);
    }

    let Some(mut removed) = found else {
        debug!(network = %network.id(), machine = %machine, "machine not reachable in chain");
        if missing.as_ref() == Some(machine) {
            // The walk stopped at the machine itself: its record is gone.
            match &previous {
                Some(prev_id) => {
                    if let Some(mut prev) = directory.get(store, prev_id).await? {
                        warn!(
                            network = %network.id(),
                            machine = %machine,
                            "detaching link to missing machine"
                        );
                        prev.set_next(store, None).await?;
                        directory.commit(&prev);
                    }
                }
                None => network.set_head(store, None).await?,
            }
        }
        if network.last() == Some(machine) {
            warn!(network = %network.id(), machine = %machine, "unreachable chain tail reset");
            network.set_last(store, previous).await?;
        }
        clear_next(store, directory, machine).await?;
        return Ok(false);
    };

    let successor = removed.next().cloned();
    match &previous {
        Some(prev_id) => {
            if let Some(mut prev) = directory.get(store, prev_id).await? {
                prev.set_next(store, successor.clone()).await?;
                directory.commit(&prev);
            }
        }
        None => network.set_head(store, successor).await?,
    }
    if network.last() == Some(machine) {
        network.set_last(store, previous).await?;
    }
    removed.set_next(store, None).await?;
    directory.commit(&removed);
    Ok(true)
}

/// Rebuild the chain so it visits every member once.
///
/// The valid prefix of the current chain keeps its order; the remaining
/// members follow in id order. Members without a stored record are dropped
/// from the network. Returns the new chain order.
pub async fn repair<S: FieldStore>(
    store: &S,
    directory: &mut Directory,
    network: &mut Network,
) -> Result<Vec<MachineId>, CoreError> {
    let walk = walk(store, directory, network).await?;
    let mut order = walk.order;
    let reached: HashSet<MachineId> = order.iter().cloned().collect();
    order.extend(
        network
            .members()
            .iter()
            .filter(|member| !reached.contains(*member))
            .cloned(),
    );

    let mut live = Vec::with_capacity(order.len());
    for id in order {
        match directory.get(store, &id).await? {
            Some(machine) => live.push(machine),
            None => {
                warn!(network = %network.id(), machine = %id, "dropping member without record");
                network.remove_member(store, &id).await?;
            }
        }
    }

    let ids: Vec<MachineId> = live.iter().map(|machine| machine.id().clone()).collect();
    let successors = ids.iter().skip(1).cloned().map(Some).chain(std::iter::once(None));
    for (mut machine, successor) in live.into_iter().zip(successors) {
        machine.set_next(store, successor).await?;
        directory.commit(&machine);
    }
    network.set_head(store, ids.first().cloned()).await?;
    network.set_last(store, ids.last().cloned()).await?;
    debug!(network = %network.id(), members = ids.len(), "chain rebuilt");
    Ok(ids)
}
