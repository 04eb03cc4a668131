//! Collaborator interfaces consumed by the storage and sync layers.
//!
//! Both traits are object-safe and `Send + Sync` so they can be shared as
//! `Arc<dyn ...>` between the sync worker and query paths.

use crate::types::{Block, ChainedPosition, Hash256};

/// Read-only view of the authoritative header chain.
///
/// The best chain is addressable by height. Positions on stale forks may
/// still be resolvable by hash if the implementation retains them.
pub trait ChainView: Send + Sync {
    /// Best-chain header at `height`, if the best chain is that tall.
    fn header_at(&self, height: u64) -> Option<ChainedPosition>;

    /// Any known header by hash, best chain or not.
    fn get(&self, hash: &Hash256) -> Option<ChainedPosition>;

    /// The parent of `position`. `None` at genesis or when the parent is unknown.
    fn previous_of(&self, position: &ChainedPosition) -> Option<ChainedPosition> {
        if position.height == 0 {
            return None;
        }
        self.get(&position.prev_hash)
    }

    /// Whether `candidate` lies on the path from `tip` back to genesis.
    /// A position is its own ancestor.
    fn is_ancestor(&self, candidate: &Hash256, tip: &Hash256) -> bool;

    /// Tip of the best chain.
    fn tip(&self) -> ChainedPosition;

    /// Whether `hash` is on the current best chain.
    fn contains(&self, hash: &Hash256) -> bool {
        self.is_ancestor(hash, &self.tip().hash)
    }
}

/// Asynchronous supplier of full blocks, polled without blocking.
pub trait BlockSource: Send + Sync {
    /// Take the block for `position` if it has arrived.
    ///
    /// A returned block is handed over; a second call for the same position
    /// returns `None` unless the block arrives again.
    fn try_take(&self, position: &ChainedPosition) -> Option<Block>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_chain_view_object_safe(_: &dyn ChainView) {}
    fn _assert_block_source_object_safe(_: &dyn BlockSource) {}

    struct Line(Vec<ChainedPosition>);

    impl ChainView for Line {
        fn header_at(&self, height: u64) -> Option<ChainedPosition> {
            self.0.get(height as usize).cloned()
        }

        fn get(&self, hash: &Hash256) -> Option<ChainedPosition> {
            self.0.iter().find(|p| p.hash == *hash).cloned()
        }

        fn is_ancestor(&self, candidate: &Hash256, tip: &Hash256) -> bool {
            let Some(tip) = self.get(tip) else { return false };
            self.0[..=tip.height as usize].iter().any(|p| p.hash == *candidate)
        }

        fn tip(&self) -> ChainedPosition {
            self.0[self.0.len() - 1].clone()
        }
    }

    fn line(len: u8) -> Line {
        let mut prev = Hash256::ZERO;
        let positions = (0..len)
            .map(|i| {
                let pos = ChainedPosition {
                    hash: Hash256([i + 1; 32]),
                    height: i as u64,
                    prev_hash: prev,
                    chain_work: i as u128 + 1,
                };
                prev = pos.hash;
                pos
            })
            .collect();
        Line(positions)
    }

    #[test]
    fn previous_of_walks_back() {
        let chain = line(3);
        let tip = chain.tip();
        let parent = chain.previous_of(&tip).unwrap();
        assert_eq!(parent.height, 1);
        let genesis = chain.previous_of(&parent).unwrap();
        assert!(chain.previous_of(&genesis).is_none());
    }

    #[test]
    fn contains_uses_best_tip() {
        let chain = line(3);
        assert!(chain.contains(&Hash256([1; 32])));
        assert!(!chain.contains(&Hash256([9; 32])));
    }
}
