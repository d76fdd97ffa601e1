//! Configuration loading and typed config structures for the Fluxgrid engine.
//!
//! The canonical configuration lives in `fluxgrid-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file. Every
//! section and field is optional and falls back to the defaults below.

use std::collections::BTreeMap;
use std::path::Path;

use fluxgrid_types::{Location, MachineSpec};
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `fluxgrid-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GridConfig {
    /// Real-time loop settings used by the engine binary.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chunked tick scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Machine directory settings.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Identifier allocator settings.
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Persistence backend selection.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Machine types registered at startup, keyed by type key.
    #[serde(default)]
    pub machine_types: BTreeMap<String, MachineSpec>,

    /// Placements replayed at startup as if a host had reported them.
    #[serde(default)]
    pub seed: Vec<SeedPlacement>,
}

impl GridConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `DRAGONFLY_URL` overrides `storage.dragonfly_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.storage.apply_env_overrides();
        Ok(config)
    }
}

/// Real-time loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Real-time milliseconds between external tick signals.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stop after this many ticks (0 = run until interrupted).
    #[serde(default)]
    pub max_ticks: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: 0,
        }
    }
}

/// What the scheduler does with each machine it visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Push energy along every outgoing link.
    #[default]
    LinkedTransfer,
    /// Push energy to the chain successor, gated on the predecessor's push.
    ChainRelay,
}

/// Which machines the scheduler walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanScope {
    /// Every live network, in chain order.
    #[default]
    Networks,
    /// Every known machine, in id order, networked or not.
    AllMachines,
}

/// Chunked tick scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Work happens on every N-th external tick.
    #[serde(default = "default_interval_ticks")]
    pub interval_ticks: u32,

    /// Maximum machines processed per invocation.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Per-machine work.
    #[serde(default)]
    pub work: WorkKind,

    /// Walk scope.
    #[serde(default)]
    pub scope: ScanScope,

    /// Start the scheduler as soon as the grid opens.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ticks: default_interval_ticks(),
            chunk_size: default_chunk_size(),
            work: WorkKind::default(),
            scope: ScanScope::default(),
            autostart: true,
        }
    }
}

/// Machine directory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryConfig {
    /// Keep machines cached in memory. Disabling only costs latency.
    #[serde(default = "default_true")]
    pub cache: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { cache: true }
    }
}

/// Identifier allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllocatorConfig {
    /// Candidates tried before allocation fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Persistence backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local map. Nothing survives the process.
    #[default]
    Memory,
    /// `Dragonfly`/Redis at `dragonfly_url`.
    Dragonfly,
}

/// Persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Which backend to open.
    #[serde(default)]
    pub backend: BackendKind,

    /// Dragonfly (Redis-compatible) URL.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,
}

impl StorageConfig {
    /// Override the Dragonfly URL with `DRAGONFLY_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DRAGONFLY_URL") {
            self.dragonfly_url = val;
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            dragonfly_url: default_dragonfly_url(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// A machine placement replayed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedPlacement {
    /// Registered type key.
    pub type_key: String,
    /// East-west coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
    /// North-south coordinate.
    pub z: i32,
    /// Dimension numeral.
    #[serde(default)]
    pub dimension: i32,
}

impl SeedPlacement {
    /// The placement's location.
    pub const fn location(&self) -> Location {
        Location::new(self.x, self.y, self.z, self.dimension)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    50
}

const fn default_interval_ticks() -> u32 {
    1
}

const fn default_chunk_size() -> u32 {
    64
}

const fn default_max_attempts() -> u32 {
    16
}

fn default_dragonfly_url() -> String {
    "redis://localhost:6379".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}
