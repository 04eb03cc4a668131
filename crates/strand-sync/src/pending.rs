//! Blocks that arrived ahead of the store tip.

use std::collections::HashMap;

use strand_core::types::{ChainedPosition, Hash256, StoredBlock};

/// In-memory holding area for out-of-order blocks, keyed by block hash.
///
/// Owned by the pipeline state; nothing else reads or writes it.
#[derive(Debug, Default)]
pub struct PendingStorageBuffer {
    blocks: HashMap<Hash256, (ChainedPosition, StoredBlock)>,
    bytes: usize,
}

impl PendingStorageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a block. Returns `false` if the hash was already held.
    pub fn insert(&mut self, position: ChainedPosition, block: StoredBlock) -> bool {
        if self.blocks.contains_key(&position.hash) {
            return false;
        }
        self.bytes += block.size();
        self.blocks.insert(position.hash, (position, block));
        true
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Remove and return the block for `hash`.
    pub fn take(&mut self, hash: &Hash256) -> Option<(ChainedPosition, StoredBlock)> {
        let entry = self.blocks.remove(hash)?;
        self.bytes -= entry.1.size();
        Some(entry)
    }

    /// Drop every block whose position fails `keep`. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&ChainedPosition) -> bool) -> usize {
        let before = self.blocks.len();
        let mut freed = 0;
        self.blocks.retain(|_, (position, block)| {
            let kept = keep(position);
            if !kept {
                freed += block.size();
            }
            kept
        });
        self.bytes -= freed;
        before - self.blocks.len()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total serialized size of held blocks.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}
