//! Real-time tick loop.
//!
//! Drives [`Grid::tick`] from a `tokio` interval until the configured tick
//! limit is reached or the process receives Ctrl-C. Shutdown is only
//! observed between ticks, so every transfer a tick starts is finished on
//! both endpoints before the loop exits.
//!
//! # Run Lifecycle
//!
//! ```text
//! replay_seed() -> run() -> [interval tick -> Grid::tick()]* -> log_run_end()
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use fluxgrid_core::Grid;
use fluxgrid_core::config::{EngineConfig, SeedPlacement};
use fluxgrid_store::FieldStore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Why the tick loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `engine.max_ticks` ticks were delivered.
    MaxTicks,
    /// The process was interrupted.
    Interrupted,
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Why the loop stopped.
    pub end_reason: EndReason,
    /// External ticks delivered.
    pub total_ticks: u64,
    /// Ticks on which the scheduler did work.
    pub working_ticks: u64,
    /// Total energy moved by the scheduler.
    pub energy_moved: u64,
    /// Networks abandoned mid-pass because of a corrupt chain.
    pub networks_skipped: u64,
    /// Wall-clock start of the loop.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the loop.
    pub finished_at: DateTime<Utc>,
}

/// Replay configured placements as if a host had reported them.
///
/// Returns how many placements produced a machine. Placements of
/// unregistered types are skipped with a warning.
pub async fn replay_seed<S: FieldStore>(
    grid: &mut Grid<S>,
    seed: &[SeedPlacement],
) -> Result<u32, EngineError> {
    let mut placed: u32 = 0;
    for placement in seed {
        let location = placement.location();
        match grid.on_node_appeared(&placement.type_key, location).await? {
            Some(id) => {
                debug!(machine = %id, %location, "seed placement");
                placed = placed.saturating_add(1);
            }
            None => warn!(
                type_key = placement.type_key,
                %location,
                "seed placement uses an unregistered type, skipped"
            ),
        }
    }
    Ok(placed)
}

/// Run the tick loop until `max_ticks` or Ctrl-C.
pub async fn run<S: FieldStore>(
    grid: &mut Grid<S>,
    engine: &EngineConfig,
) -> Result<RunResult, EngineError> {
    let started_at = Utc::now();
    let mut interval = tokio::time::interval(Duration::from_millis(engine.tick_interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut result = RunResult {
        end_reason: EndReason::MaxTicks,
        total_ticks: 0,
        working_ticks: 0,
        energy_moved: 0,
        networks_skipped: 0,
        started_at,
        finished_at: started_at,
    };

    info!(
        tick_interval_ms = engine.tick_interval_ms,
        max_ticks = engine.max_ticks,
        networks = grid.network_count(),
        "entering tick loop"
    );

    loop {
        if engine.max_ticks > 0 && result.total_ticks >= engine.max_ticks {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                let summary = grid.tick().await?;
                result.total_ticks = summary.tick;
                if summary.worked {
                    result.working_ticks = result.working_ticks.saturating_add(1);
                }
                result.energy_moved = result.energy_moved.saturating_add(summary.energy_moved);
                let skipped = u64::try_from(summary.networks_skipped.len()).unwrap_or(u64::MAX);
                result.networks_skipped = result.networks_skipped.saturating_add(skipped);
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C, stopping");
                }
                result.end_reason = EndReason::Interrupted;
                break;
            }
        }
    }

    grid.scheduler_mut().stop();
    result.finished_at = Utc::now();
    Ok(result)
}

/// Log the outcome of a run.
pub fn log_run_end(result: &RunResult) {
    let elapsed = result.finished_at.signed_duration_since(result.started_at);
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        working_ticks = result.working_ticks,
        energy_moved = result.energy_moved,
        networks_skipped = result.networks_skipped,
        started_at = %result.started_at.to_rfc3339(),
        elapsed_ms = elapsed.num_milliseconds(),
        "tick loop ended"
    );
}
