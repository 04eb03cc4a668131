//! Store configuration.

use serde::Deserialize;

/// Default number of undo records retained per store.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 500;

/// Configuration shared by the block archive and the coinview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Undo records kept per store; also the deepest reorg that can be
    /// repaired by rewinding. Zero keeps every record.
    pub max_reorg_depth: u64,
    /// Fsync the write-ahead log on every commit and rewind.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    /// Configuration for throwaway stores in tests: unbounded history, no fsync.
    pub fn unbounded() -> Self {
        Self {
            max_reorg_depth: 0,
            sync_writes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retains_bounded_history() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.max_reorg_depth, DEFAULT_MAX_REORG_DEPTH);
        assert!(cfg.sync_writes);
    }

    #[test]
    fn unbounded_disables_retention() {
        assert_eq!(StoreConfig::unbounded().max_reorg_depth, 0);
    }
}
