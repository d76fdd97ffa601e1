//! Cooperative, chunked tick scheduler.
//!
//! [`Grid::tick`] is called once per external tick signal. Every
//! `interval`-th call does at most `chunk_size` machines' worth of work and
//! then returns, leaving a cursor that the next call resumes from. Once
//! every network (or machine) has been visited the cursor wraps and that call
//! ends, so no machine is processed twice in one call. A call that wraps
//! before processing anything starts the next pass right away instead of
//! idling.
//!
//! A network counts as completed only if its chain reached every member; a
//! chain that ends early is reported as corrupt and skipped like one that
//! loops or points outside the network.
//!
//! Each transfer completes on both endpoints before the loop moves on, and
//! stop is only observed on entry, so a stopped scheduler never leaves a
//! half-applied transfer behind.

use std::collections::HashSet;

use fluxgrid_store::FieldStore;
use fluxgrid_types::{MachineId, NetworkId};
use tracing::{debug, info, warn};

use crate::chain::ChainFault;
use crate::config::{ScanScope, SchedulerConfig, WorkKind};
use crate::error::CoreError;
use crate::grid::Grid;
use crate::transfer;

/// Resumable position of the scheduler between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Cursor {
    /// Network being walked.
    network: Option<NetworkId>,
    /// Next machine to process in it.
    position: Option<MachineId>,
    /// Machines already processed in the current network.
    visited: HashSet<MachineId>,
    /// Whether the previous chain element moved energy.
    gate_open: bool,
    /// Last network finished in this pass.
    after_network: Option<NetworkId>,
    /// Last machine processed in this pass (machine scope).
    after_machine: Option<MachineId>,
}

impl Cursor {
    fn enter(&mut self, network: NetworkId, head: Option<MachineId>) {
        self.network = Some(network);
        self.position = head;
        self.visited.clear();
        self.gate_open = true;
    }

    fn leave(&mut self) {
        self.after_network = self.network.take();
        self.position = None;
        self.visited.clear();
    }
}

/// What one call to [`Grid::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// External tick number, starting at 1.
    pub tick: u64,
    /// Whether this tick ran scheduler work.
    pub worked: bool,
    /// Machines processed.
    pub machines_processed: u32,
    /// Transfers that moved energy.
    pub transfers: u32,
    /// Total energy moved.
    pub energy_moved: u64,
    /// Networks walked to the end.
    pub networks_completed: u32,
    /// Networks abandoned for this pass because their chain is corrupt.
    pub networks_skipped: Vec<NetworkId>,
    /// Whether the pass finished and the cursor wrapped.
    pub wrapped: bool,
}

impl TickSummary {
    /// Whether no network or machine has been touched yet.
    const fn is_idle(&self) -> bool {
        self.machines_processed == 0
            && self.networks_completed == 0
            && self.networks_skipped.is_empty()
    }
}

/// Chunked work scheduler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickScheduler {
    running: bool,
    interval: u32,
    chunk_size: u32,
    work: WorkKind,
    scope: ScanScope,
    ticks_seen: u64,
    passes: u64,
    cursor: Cursor,
}

impl TickScheduler {
    /// Build a scheduler from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for a zero interval or chunk
    /// size.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, CoreError> {
        let mut scheduler = Self {
            running: false,
            interval: 1,
            chunk_size: 1,
            work: config.work,
            scope: config.scope,
            ticks_seen: 0,
            passes: 0,
            cursor: Cursor::default(),
        };
        scheduler.set_interval(config.interval_ticks)?;
        scheduler.set_chunk_size(config.chunk_size)?;
        if config.autostart {
            scheduler.start();
        }
        Ok(scheduler)
    }

    /// Start scheduling. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        info!(
            interval = self.interval,
            chunk_size = self.chunk_size,
            work = ?self.work,
            scope = ?self.scope,
            "scheduler started"
        );
        true
    }

    /// Stop scheduling. Takes effect at the next tick. Returns `false` if
    /// already stopped.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        info!(ticks = self.ticks_seen, passes = self.passes, "scheduler stopped");
        true
    }

    /// Whether the scheduler is running.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Work on every `ticks`-th tick.
    pub fn set_interval(&mut self, ticks: u32) -> Result<(), CoreError> {
        if ticks == 0 {
            return Err(CoreError::InvalidArgument(
                "scheduler interval must be at least one tick".to_owned(),
            ));
        }
        self.interval = ticks;
        Ok(())
    }

    /// Current interval in ticks.
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// Process at most `machines` per tick.
    pub fn set_chunk_size(&mut self, machines: u32) -> Result<(), CoreError> {
        if machines == 0 {
            return Err(CoreError::InvalidArgument(
                "scheduler chunk size must be at least one machine".to_owned(),
            ));
        }
        self.chunk_size = machines;
        Ok(())
    }

    /// Current chunk size.
    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the per-machine work. Restarts the pass if it changed.
    pub fn set_work(&mut self, work: WorkKind) {
        if self.work != work {
            self.work = work;
            self.reset();
        }
    }

    /// Current per-machine work.
    pub const fn work(&self) -> WorkKind {
        self.work
    }

    /// Change the walk scope. Restarts the pass if it changed.
    pub fn set_scope(&mut self, scope: ScanScope) {
        if self.scope != scope {
            self.scope = scope;
            self.reset();
        }
    }

    /// Current walk scope.
    pub const fn scope(&self) -> ScanScope {
        self.scope
    }

    /// External ticks seen so far.
    pub const fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }

    /// Completed passes.
    pub const fn passes(&self) -> u64 {
        self.passes
    }

    /// Network the cursor is parked in, if any.
    pub const fn current_network(&self) -> Option<&NetworkId> {
        self.cursor.network.as_ref()
    }

    /// Restart the pass from the beginning.
    pub fn reset(&mut self) {
        self.cursor = Cursor::default();
    }

    /// Keep the cursor valid when `machine` is deleted.
    pub(crate) fn forget_machine(&mut self, machine: &MachineId, successor: Option<MachineId>) {
        if self.cursor.position.as_ref() == Some(machine) {
            self.cursor.position = successor;
        }
        self.cursor.visited.remove(machine);
    }

    fn wrap(&mut self) {
        self.cursor = Cursor::default();
        self.passes = self.passes.saturating_add(1);
        debug!(passes = self.passes, "scheduler pass complete");
    }
}

impl<S: FieldStore> Grid<S> {
    /// Handle one external tick signal.
    pub async fn tick(&mut self) -> Result<TickSummary, CoreError> {
        self.scheduler.ticks_seen = self.scheduler.ticks_seen.saturating_add(1);
        let mut summary = TickSummary {
            tick: self.scheduler.ticks_seen,
            ..TickSummary::default()
        };
        let due = self
            .scheduler
            .ticks_seen
            .checked_rem(u64::from(self.scheduler.interval))
            == Some(0);
        if !self.scheduler.running || !due {
            return Ok(summary);
        }

        summary.worked = true;
        match self.scheduler.scope {
            ScanScope::Networks => self.tick_networks(&mut summary).await?,
            ScanScope::AllMachines => self.tick_machines(&mut summary).await?,
        }
        debug!(
            tick = summary.tick,
            machines = summary.machines_processed,
            moved = summary.energy_moved,
            wrapped = summary.wrapped,
            "tick processed"
        );
        Ok(summary)
    }

    async fn tick_networks(&mut self, summary: &mut TickSummary) -> Result<(), CoreError> {
        self.settle_cursor();
        let budget = self.scheduler.chunk_size;

        while summary.machines_processed < budget {
            let network_id = match self.scheduler.cursor.network.clone() {
                Some(id) => id,
                None => {
                    let next = self
                        .networks
                        .next_after(self.scheduler.cursor.after_network.as_ref());
                    let Some(id) = next else {
                        let idle = !summary.wrapped && summary.is_idle();
                        self.scheduler.wrap();
                        summary.wrapped = true;
                        if idle && !self.networks.is_empty() {
                            continue;
                        }
                        break;
                    };
                    let head = self.networks.get(&id).and_then(|n| n.head().cloned());
                    self.scheduler.cursor.enter(id.clone(), head);
                    id
                }
            };

            let Some(machine) = self.scheduler.cursor.position.clone() else {
                self.finish_network(network_id, summary);
                continue;
            };

            if let Some(fault) = self.visit_chain_member(&network_id, &machine, summary).await? {
                self.skip_network(network_id, &fault, summary);
                continue;
            }
            let cursor = &self.scheduler.cursor;
            if cursor.position.is_none() && cursor.network.is_some() {
                self.finish_network(network_id, summary);
            }
        }
        Ok(())
    }

    /// Close the walk of a network whose chain pointer ran out.
    fn finish_network(&mut self, network_id: NetworkId, summary: &mut TickSummary) {
        let visited = &self.scheduler.cursor.visited;
        let (members, missed) = self.networks.get(&network_id).map_or((0, 0), |network| {
            let missed = network
                .members()
                .iter()
                .filter(|member| !visited.contains(*member))
                .count();
            (network.len(), missed)
        });
        if missed == 0 {
            summary.networks_completed = summary.networks_completed.saturating_add(1);
            self.scheduler.cursor.leave();
            return;
        }
        let fault = ChainFault::Truncated {
            reached: members.saturating_sub(missed),
            members,
        };
        self.skip_network(network_id, &fault, summary);
    }

    fn skip_network(
        &mut self,
        network_id: NetworkId,
        fault: &ChainFault,
        summary: &mut TickSummary,
    ) {
        let err = CoreError::CorruptTopology {
            network: network_id.clone(),
            reason: fault.to_string(),
        };
        warn!(error = %err, "skipping network for the rest of this pass");
        summary.networks_skipped.push(network_id);
        self.scheduler.cursor.leave();
    }

    /// Drop a parked position that topology changes made meaningless.
    fn settle_cursor(&mut self) {
        let cursor = &mut self.scheduler.cursor;
        let Some(network_id) = cursor.network.as_ref() else {
            return;
        };
        let valid = match (self.networks.get(network_id), cursor.position.as_ref()) {
            (None, _) => false,
            (Some(network), Some(position)) => network.contains(position),
            (Some(_), None) => true,
        };
        if !valid {
            debug!(network = %network_id, "network changed since last tick, moving on");
            cursor.leave();
        }
    }

    /// Process one chain element. Returns the fault that stopped the walk.
    async fn visit_chain_member(
        &mut self,
        network_id: &NetworkId,
        machine_id: &MachineId,
        summary: &mut TickSummary,
    ) -> Result<Option<ChainFault>, CoreError> {
        let cursor = &mut self.scheduler.cursor;
        if cursor.visited.contains(machine_id) {
            return Ok(Some(ChainFault::Revisit(machine_id.clone())));
        }
        let Some(network) = self.networks.get(network_id) else {
            cursor.leave();
            return Ok(None);
        };
        if !network.contains(machine_id) {
            return Ok(Some(ChainFault::Stray(machine_id.clone())));
        }
        let Some(mut machine) = self.directory.get(&self.store, machine_id).await? else {
            return Ok(Some(ChainFault::Dangling(machine_id.clone())));
        };
        let successor = machine.next().cloned();

        match self.scheduler.work {
            WorkKind::LinkedTransfer => {
                let totals =
                    transfer::transfer_to_linked(&self.store, &mut self.directory, machine_id)
                        .await?;
                summary.energy_moved = summary.energy_moved.saturating_add(totals.moved);
                summary.transfers = summary.transfers.saturating_add(totals.transfers);
            }
            WorkKind::ChainRelay => {
                let mut moved = 0;
                if self.scheduler.cursor.gate_open {
                    if let Some(next_id) = successor.as_ref().filter(|id| network.contains(id)) {
                        if let Some(mut target) = self.directory.get(&self.store, next_id).await? {
                            let rate = machine.transfer_rate();
                            moved = transfer::transfer_energy(&self.store, &mut machine, &mut target, rate)
                                .await?;
                            self.directory.commit(&machine);
                            self.directory.commit(&target);
                        }
                    }
                    self.scheduler.cursor.gate_open = moved > 0;
                }
                if moved > 0 {
                    summary.energy_moved = summary.energy_moved.saturating_add(u64::from(moved));
                    summary.transfers = summary.transfers.saturating_add(1);
                }
            }
        }

        let cursor = &mut self.scheduler.cursor;
        cursor.visited.insert(machine_id.clone());
        cursor.position = successor;
        summary.machines_processed = summary.machines_processed.saturating_add(1);
        Ok(None)
    }

    async fn tick_machines(&mut self, summary: &mut TickSummary) -> Result<(), CoreError> {
        let budget = self.scheduler.chunk_size;
        let ids = self.directory.machine_ids(&self.store).await?;
        let start = self
            .scheduler
            .cursor
            .after_machine
            .as_ref()
            .map_or(0, |after| ids.partition_point(|id| id <= after));

        for id in ids.iter().skip(start) {
            if summary.machines_processed >= budget {
                return Ok(());
            }
            let totals = transfer::transfer_to_linked(&self.store, &mut self.directory, id).await?;
            summary.energy_moved = summary.energy_moved.saturating_add(totals.moved);
            summary.transfers = summary.transfers.saturating_add(totals.transfers);
            summary.machines_processed = summary.machines_processed.saturating_add(1);
            self.scheduler.cursor.after_machine = Some(id.clone());
        }
        self.scheduler.wrap();
        summary.wrapped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_settings_are_rejected() {
        let config = SchedulerConfig {
            chunk_size: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            TickScheduler::from_config(&config),
            Err(CoreError::InvalidArgument(_))
        ));

        let Ok(mut scheduler) = TickScheduler::from_config(&SchedulerConfig::default()) else {
            return;
        };
        assert!(scheduler.set_interval(0).is_err());
        assert!(scheduler.set_chunk_size(0).is_err());
        assert_eq!(scheduler.interval(), 1);
        assert_eq!(scheduler.chunk_size(), 64);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let config = SchedulerConfig {
            autostart: false,
            ..SchedulerConfig::default()
        };
        let Ok(mut scheduler) = TickScheduler::from_config(&config) else {
            return;
        };
        assert!(!scheduler.is_running());
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.stop());
        assert!(!scheduler.stop());
    }

    #[test]
    fn changing_work_or_scope_restarts_the_pass() {
        let Ok(mut scheduler) = TickScheduler::from_config(&SchedulerConfig::default()) else {
            return;
        };
        scheduler
            .cursor
            .enter(NetworkId::new("n"), Some(MachineId::new("m")));
        scheduler.set_work(WorkKind::LinkedTransfer);
        assert!(scheduler.current_network().is_some());
        scheduler.set_work(WorkKind::ChainRelay);
        assert!(scheduler.current_network().is_none());

        scheduler
            .cursor
            .enter(NetworkId::new("n"), Some(MachineId::new("m")));
        scheduler.set_scope(ScanScope::AllMachines);
        assert!(scheduler.current_network().is_none());
    }

    #[test]
    fn deleted_position_moves_to_successor() {
        let Ok(mut scheduler) = TickScheduler::from_config(&SchedulerConfig::default()) else {
            return;
        };
        scheduler
            .cursor
            .enter(NetworkId::new("n"), Some(MachineId::new("a")));
        scheduler.forget_machine(&MachineId::new("a"), Some(MachineId::new("b")));
        assert_eq!(scheduler.cursor.position, Some(MachineId::new("b")));
        scheduler.forget_machine(&MachineId::new("z"), None);
        assert_eq!(scheduler.cursor.position, Some(MachineId::new("b")));
    }
}
