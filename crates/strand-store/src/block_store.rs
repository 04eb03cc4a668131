//! Raw block archive: block hash -> serialized block.

use std::path::Path;

use tracing::{debug, info};

use strand_core::error::StoreError;
use strand_core::types::{Block, ChainedPosition, Hash256, StoredBlock, TipPointer};

use crate::config::StoreConfig;
use crate::ledger::{RewindLedger, UndoRecord};

const NAMESPACE: &str = "blocks";

/// Durable, rewindable archive of full blocks.
///
/// Blocks are never overwritten: a block is either absent or present with the
/// bytes it was first stored with.
pub struct BlockStore {
    ledger: RewindLedger,
}

impl BlockStore {
    /// Open or create the archive at `path`, starting at `genesis` if fresh.
    pub fn open(
        path: impl AsRef<Path>,
        genesis: &ChainedPosition,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let ledger = RewindLedger::open(path, NAMESPACE, genesis.to_tip(), config)?;
        Ok(Self { ledger })
    }

    /// Current archive tip.
    pub fn tip(&self) -> TipPointer {
        self.ledger.tip()
    }

    /// Whether a block with `hash` is stored.
    pub fn exists(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.ledger.contains(hash.as_bytes())
    }

    /// Serialized bytes of a stored block.
    pub fn get_bytes(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StoreError> {
        self.ledger.get(hash.as_bytes())
    }

    /// Decode a stored block.
    pub fn get(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        match self.ledger.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(self.ledger.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a contiguous run of blocks and move the tip to `new_tip`.
    ///
    /// `blocks` is ordered by height; the claimed old tip is the parent of the
    /// first block. Hashes already in the archive are skipped, so the undo
    /// record removes exactly what this call inserted.
    pub fn put_batch(
        &self,
        new_tip: &ChainedPosition,
        blocks: &[(ChainedPosition, StoredBlock)],
    ) -> Result<u64, StoreError> {
        let Some((first, _)) = blocks.first() else {
            return Err(StoreError::InvalidArgument("put_batch called with no blocks".into()));
        };
        let old_tip = first.prev_hash;

        let mut upserts = Vec::with_capacity(blocks.len());
        let mut inserted = Vec::with_capacity(blocks.len());
        let mut bytes = 0usize;
        for (_, block) in blocks {
            if self.exists(&block.hash)? {
                debug!(hash = %block.hash, "block already archived, skipping");
                continue;
            }
            let key = block.hash.as_bytes().to_vec();
            bytes += block.size();
            inserted.push(key.clone());
            upserts.push((key, block.bytes.clone()));
        }

        let count = upserts.len();
        let seq = self.ledger.commit(
            &old_tip,
            new_tip.to_tip(),
            upserts,
            Vec::new(),
            UndoRecord {
                remove: inserted,
                restore: Vec::new(),
            },
        )?;
        info!(height = new_tip.height, hash = %new_tip.hash, count, bytes, "stored blocks");
        Ok(seq)
    }

    /// Move the tip without touching block data.
    ///
    /// Used when the block at `new_tip` is already archived.
    pub fn set_tip(&self, old_tip: &Hash256, new_tip: &ChainedPosition) -> Result<u64, StoreError> {
        self.ledger.commit(
            old_tip,
            new_tip.to_tip(),
            Vec::new(),
            Vec::new(),
            UndoRecord::default(),
        )
    }

    /// Remove blocks that left the best chain and move the tip to `new_tip`.
    ///
    /// The removed bytes are captured in the undo record, so a rewind puts
    /// the blocks back.
    pub fn delete_range(
        &self,
        old_tip: &Hash256,
        new_tip: TipPointer,
        hashes: &[Hash256],
    ) -> Result<u64, StoreError> {
        let mut deletions = Vec::with_capacity(hashes.len());
        let mut restore = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let key = hash.as_bytes().to_vec();
            if let Some(bytes) = self.ledger.get(&key)? {
                restore.push((key.clone(), bytes));
                deletions.push(key);
            }
        }

        let removed = deletions.len();
        let seq = self.ledger.commit(
            old_tip,
            new_tip,
            Vec::new(),
            deletions,
            UndoRecord {
                remove: Vec::new(),
                restore,
            },
        )?;
        info!(height = new_tip.height, hash = %new_tip.hash, removed, "deleted blocks off the best chain");
        Ok(seq)
    }

    /// Undo the most recent archive commit.
    pub fn rewind(&self) -> Result<TipPointer, StoreError> {
        self.ledger.rewind()
    }

    /// Number of archive commits that can still be rewound.
    pub fn rewind_depth(&self) -> Result<u64, StoreError> {
        self.ledger.rewind_depth()
    }

    /// Number of archived blocks.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.ledger.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.ledger.flush()
    }
}
