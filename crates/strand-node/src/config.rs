//! Node configuration for the Strand full node.
//!
//! [`NodeConfig`] carries defaults for every setting. [`NodeConfig::load`]
//! layers an optional TOML file and `STRAND_*` environment variables on top
//! of them; nested keys use `__` (`STRAND_SYNC__STALL_THRESHOLD=20`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use strand_core::error::StrandError;
use strand_store::StoreConfig;
use strand_sync::SyncConfig;
use strand_sync::config::millis;

/// Configuration for a full node instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "strand_sync=trace").
    pub log_level: String,
    /// Log output format: "text" or "json".
    pub log_format: String,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    /// Pause after a driver round that found nothing to do.
    #[serde(deserialize_with = "millis")]
    pub idle_backoff: Duration,
    /// Blocks the download queue holds before dropping pushes.
    pub queue_capacity: usize,
    /// Most blocks connected to the coinview per driver round.
    pub coin_catch_up_limit: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strand");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            idle_backoff: Duration::from_millis(500),
            queue_capacity: strand_sync::source::DEFAULT_QUEUE_CAPACITY,
            coin_catch_up_limit: 1_000,
        }
    }
}

impl NodeConfig {
    /// Build a configuration from defaults, an optional file, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, StrandError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("STRAND")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| StrandError::Config(e.to_string()))
    }

    /// RocksDB directory of the block archive.
    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    /// RocksDB directory of the coinview.
    pub fn coinview_path(&self) -> PathBuf {
        self.data_dir.join("coinview")
    }
}
