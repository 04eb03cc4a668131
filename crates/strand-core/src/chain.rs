//! In-memory header chain.
//!
//! [`HeaderChain`] keeps every connected header by hash, including headers on
//! stale forks, and tracks the best chain by accumulated work. It is the
//! [`ChainView`] the sync pipeline reads from.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::ChainError;
use crate::traits::ChainView;
use crate::types::{BlockHeader, ChainedPosition, Hash256};

struct Inner {
    /// Every known header, forks included.
    positions: HashMap<Hash256, ChainedPosition>,
    /// Best chain hashes indexed by height.
    best: Vec<Hash256>,
}

impl Inner {
    fn tip(&self) -> &ChainedPosition {
        // `best` always holds at least the genesis hash.
        &self.positions[&self.best[self.best.len() - 1]]
    }

    fn on_best(&self, pos: &ChainedPosition) -> bool {
        self.best.get(pos.height as usize) == Some(&pos.hash)
    }
}

/// Header chain with best-chain selection by accumulated work.
pub struct HeaderChain {
    inner: RwLock<Inner>,
}

impl HeaderChain {
    /// Create a chain containing only `genesis`.
    pub fn new(genesis: &BlockHeader) -> Self {
        let hash = genesis.hash();
        let position = ChainedPosition {
            hash,
            height: 0,
            prev_hash: genesis.prev_hash,
            chain_work: genesis.work(),
        };
        let mut positions = HashMap::new();
        positions.insert(hash, position);
        Self {
            inner: RwLock::new(Inner {
                positions,
                best: vec![hash],
            }),
        }
    }

    /// Connect a header whose parent is already known.
    ///
    /// Connecting a known header is a no-op. If the new header carries more
    /// accumulated work than the current tip, it becomes the best tip.
    pub fn connect(&self, header: &BlockHeader) -> Result<ChainedPosition, ChainError> {
        let hash = header.hash();
        let mut inner = self.inner.write();
        if let Some(existing) = inner.positions.get(&hash) {
            return Ok(existing.clone());
        }

        let parent = inner
            .positions
            .get(&header.prev_hash)
            .ok_or(ChainError::UnknownParent(header.prev_hash))?;
        let position = ChainedPosition {
            hash,
            height: parent.height + 1,
            prev_hash: header.prev_hash,
            chain_work: parent.chain_work + header.work(),
        };
        inner.positions.insert(hash, position.clone());

        if position.chain_work > inner.tip().chain_work {
            Self::switch_tip(&mut inner, &position);
        }
        Ok(position)
    }

    /// Force the best tip to a known header, regardless of work.
    pub fn set_tip(&self, hash: &Hash256) -> Result<(), ChainError> {
        let mut inner = self.inner.write();
        let position = inner
            .positions
            .get(hash)
            .cloned()
            .ok_or(ChainError::UnknownHeader(*hash))?;
        Self::switch_tip(&mut inner, &position);
        Ok(())
    }

    /// Height of the best tip.
    pub fn height(&self) -> u64 {
        self.inner.read().tip().height
    }

    /// Rebuild the best-chain index so it ends at `new_tip`.
    fn switch_tip(inner: &mut Inner, new_tip: &ChainedPosition) {
        let old_tip = inner.tip().clone();

        // Walk back from the new tip until we rejoin the current best chain.
        let mut branch = Vec::new();
        let mut cursor = new_tip.clone();
        while !inner.on_best(&cursor) {
            branch.push(cursor.hash);
            match inner.positions.get(&cursor.prev_hash) {
                Some(parent) => cursor = parent.clone(),
                None => break,
            }
        }

        let fork_height = cursor.height;
        inner.best.truncate(fork_height as usize + 1);
        inner.best.extend(branch.into_iter().rev());

        if old_tip.height > fork_height && inner.best.get(old_tip.height as usize) != Some(&old_tip.hash) {
            info!(
                fork_height,
                old_tip = %old_tip.hash,
                new_tip = %new_tip.hash,
                new_height = new_tip.height,
                "header chain reorganized"
            );
        } else {
            debug!(height = new_tip.height, hash = %new_tip.hash, "header chain extended");
        }
    }
}

impl ChainView for HeaderChain {
    fn header_at(&self, height: u64) -> Option<ChainedPosition> {
        let inner = self.inner.read();
        let hash = inner.best.get(height as usize)?;
        inner.positions.get(hash).cloned()
    }

    fn get(&self, hash: &Hash256) -> Option<ChainedPosition> {
        self.inner.read().positions.get(hash).cloned()
    }

    fn is_ancestor(&self, candidate: &Hash256, tip: &Hash256) -> bool {
        let inner = self.inner.read();
        let (Some(candidate), Some(tip)) = (inner.positions.get(candidate), inner.positions.get(tip))
        else {
            return false;
        };
        if candidate.height > tip.height {
            return false;
        }
        if inner.on_best(tip) {
            return inner.on_best(candidate);
        }

        let mut cursor = tip;
        while cursor.height > candidate.height {
            match inner.positions.get(&cursor.prev_hash) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
        cursor.hash == candidate.hash
    }

    fn tip(&self) -> ChainedPosition {
        self.inner.read().tip().clone()
    }
}
