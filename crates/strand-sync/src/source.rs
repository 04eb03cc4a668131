//! In-memory [`BlockSource`] fed by the transport layer.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use strand_core::traits::BlockSource;
use strand_core::types::{Block, ChainedPosition, Hash256};

/// Default number of blocks the queue will hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded hand-off between block download and the sync pipeline.
///
/// The downloader pushes blocks in whatever order they arrive; the pipeline
/// takes them by position.
pub struct DownloadQueue {
    blocks: Mutex<HashMap<Hash256, Block>>,
    capacity: usize,
}

impl DownloadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Hand over a downloaded block.
    ///
    /// Returns `false` and drops the block if the queue is full. Pushing a
    /// block that is already queued is accepted and replaces it.
    pub fn push(&self, block: Block) -> bool {
        let hash = block.hash();
        let mut blocks = self.blocks.lock();
        if blocks.len() >= self.capacity && !blocks.contains_key(&hash) {
            warn!(%hash, capacity = self.capacity, "download queue full, dropping block");
            return false;
        }
        blocks.insert(hash, block);
        debug!(%hash, queued = blocks.len(), "block queued");
        true
    }

    /// Evict every queued block whose hash fails `keep`. Returns how many
    /// were evicted.
    ///
    /// The pipeline only takes blocks for positions it asks for; archived
    /// and stale-fork blocks stay queued until pruned.
    pub fn prune(&self, mut keep: impl FnMut(&Hash256) -> bool) -> usize {
        let mut blocks = self.blocks.lock();
        let before = blocks.len();
        blocks.retain(|hash, _| keep(hash));
        let evicted = before - blocks.len();
        if evicted > 0 {
            debug!(evicted, queued = blocks.len(), "pruned download queue");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl BlockSource for DownloadQueue {
    fn try_take(&self, position: &ChainedPosition) -> Option<Block> {
        self.blocks.lock().remove(&position.hash)
    }
}
