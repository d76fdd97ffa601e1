//! Engine binary for Fluxgrid.
//!
//! Wires configuration, logging, the persistence backend and the grid
//! together, then drives the tick loop until a termination condition is met.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `FLUXGRID_CONFIG` or `fluxgrid-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the configured backend (memory or Dragonfly)
//! 4. Open the grid, rebuilding machines and networks from the store
//! 5. Replay seed placements
//! 6. Run the tick loop
//! 7. Log the result

mod error;
mod runner;

use std::path::{Path, PathBuf};

use fluxgrid_core::config::{BackendKind, LoggingConfig};
use fluxgrid_core::{Grid, GridConfig};
use fluxgrid_store::{DragonflyStore, FieldStore, MemoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "fluxgrid-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the tick loop fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("fluxgrid-engine starting");
    info!(
        source = %source.as_deref().map_or_else(|| "defaults".into(), Path::to_string_lossy),
        backend = ?config.storage.backend,
        machine_types = config.machine_types.len(),
        seed_placements = config.seed.len(),
        "Configuration loaded"
    );

    // 3-7. Open the backend and run.
    match config.storage.backend {
        BackendKind::Memory => serve(MemoryStore::new(), &config).await?,
        BackendKind::Dragonfly => {
            info!(url = config.storage.dragonfly_url, "Connecting to Dragonfly");
            let store = DragonflyStore::connect(&config.storage.dragonfly_url).await?;
            serve(store, &config).await?;
        }
    }

    info!("fluxgrid-engine shutdown complete");
    Ok(())
}

/// Open the grid over `store`, replay the seed, and run the tick loop.
async fn serve<S: FieldStore>(store: S, config: &GridConfig) -> Result<(), EngineError> {
    let mut grid = Grid::open(store, config).await?;
    info!(
        machines = grid.directory().cached_len(),
        networks = grid.network_count(),
        "Grid opened"
    );

    let placed = runner::replay_seed(&mut grid, &config.seed).await?;
    info!(placed, networks = grid.network_count(), "Seed placements replayed");

    let result = runner::run(&mut grid, &config.engine).await?;
    runner::log_run_end(&result);
    Ok(())
}

/// Initialize the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Load configuration from `FLUXGRID_CONFIG`, falling back to
/// `fluxgrid-config.yaml` in the working directory, then to defaults.
///
/// Returns the path the configuration came from, if any.
fn load_config() -> Result<(GridConfig, Option<PathBuf>), EngineError> {
    let config_path = std::env::var_os("FLUXGRID_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if config_path.exists() {
        let config = GridConfig::from_file(&config_path)?;
        Ok((config, Some(config_path)))
    } else {
        Ok((GridConfig::default(), None))
    }
}
