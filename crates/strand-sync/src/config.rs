//! Sync pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Flush a batch once it holds this many serialized bytes.
pub const DEFAULT_BATCH_MAX_BYTES: usize = 4 * 1024 * 1024;
/// Flush a batch once this long has passed since the previous flush.
pub const DEFAULT_BATCH_MAX_INTERVAL: Duration = Duration::from_secs(20);
/// Consecutive misses tolerated before the acquisition step yields.
pub const DEFAULT_STALL_THRESHOLD: u32 = 10;
/// Wait between two polls of the block source.
pub const DEFAULT_STALL_BACKOFF: Duration = Duration::from_millis(100);
/// The store counts as in initial sync while this far behind the best tip.
pub const DEFAULT_INITIAL_SYNC_DISTANCE: u64 = 100;
/// Positions polled past `next` after each acquired block.
pub const DEFAULT_ACQUISITION_LOOKAHEAD: u64 = 16;

/// Tuning for the sync pipeline. Durations are read as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_max_bytes: usize,
    #[serde(deserialize_with = "millis")]
    pub batch_max_interval: Duration,
    pub stall_threshold: u32,
    #[serde(deserialize_with = "millis")]
    pub stall_backoff: Duration,
    pub initial_sync_distance: u64,
    pub acquisition_lookahead: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            batch_max_interval: DEFAULT_BATCH_MAX_INTERVAL,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            stall_backoff: DEFAULT_STALL_BACKOFF,
            initial_sync_distance: DEFAULT_INITIAL_SYNC_DISTANCE,
            acquisition_lookahead: DEFAULT_ACQUISITION_LOOKAHEAD,
        }
    }
}

/// Deserialize a [`Duration`] from an integer number of milliseconds.
pub fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.batch_max_bytes, 4 * 1024 * 1024);
        assert_eq!(cfg.batch_max_interval, Duration::from_secs(20));
        assert_eq!(cfg.stall_threshold, 10);
        assert_eq!(cfg.stall_backoff, Duration::from_millis(100));
        assert_eq!(cfg.initial_sync_distance, 100);
        assert_eq!(cfg.acquisition_lookahead, 16);
    }
}
