//! Coinview maintenance: turning archived blocks into coin changes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use strand_core::error::{CoinError, StoreError};
use strand_core::traits::ChainView;
use strand_core::types::{Block, ChainedPosition, Hash256, UnspentOutputSet};
use strand_store::{BlockStore, CoinView};

/// What one [`CoinUpdater::catch_up`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub applied: u64,
    pub rewound: u64,
}

/// Keeps the coinview following the block archive along the best chain.
pub struct CoinUpdater {
    chain: Arc<dyn ChainView>,
    blocks: Arc<BlockStore>,
    coins: Arc<CoinView>,
}

impl CoinUpdater {
    pub fn new(chain: Arc<dyn ChainView>, blocks: Arc<BlockStore>, coins: Arc<CoinView>) -> Self {
        Self {
            chain,
            blocks,
            coins,
        }
    }

    /// Connect `block` at `position` on top of the coinview tip.
    ///
    /// Spends every output referenced by a non-coinbase input and adds the
    /// outputs of every transaction. Outputs created earlier in the same
    /// block may be spent by later transactions.
    pub fn apply_block(&self, position: &ChainedPosition, block: &Block) -> Result<u64, CoinError> {
        let mut created = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            created.push(tx.txid()?);
        }
        // Created txids are looked up too: a duplicate txid overwrites a
        // stored set, which then has to be restored on rewind.
        let mut referenced: Vec<Hash256> = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .flat_map(|tx| tx.inputs.iter().map(|input| input.previous_output.txid))
            .chain(created.iter().copied())
            .collect();
        referenced.sort_unstable_by_key(|txid| txid.0);
        referenced.dedup();

        let response = self.coins.fetch_coins(&referenced)?;
        if response.tip.hash != position.prev_hash {
            return Err(StoreError::TipMismatch {
                expected: position.prev_hash,
                actual: response.tip.hash,
            }
            .into());
        }

        // txid -> slot in `touched`, which keeps first-touch order.
        let mut index: HashMap<Hash256, usize> = HashMap::new();
        let mut touched: Vec<(Option<UnspentOutputSet>, UnspentOutputSet)> = Vec::new();
        for coins in response.coins.into_iter().flatten() {
            index.insert(coins.txid, touched.len());
            touched.push((Some(coins.clone()), coins));
        }

        for (tx, txid) in block.transactions.iter().zip(created) {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let outpoint = &input.previous_output;
                    let missing = || CoinError::MissingCoin {
                        txid: outpoint.txid,
                        index: outpoint.index,
                    };
                    let slot = *index.get(&outpoint.txid).ok_or_else(missing)?;
                    touched[slot].1.spend(outpoint.index).ok_or_else(missing)?;
                }
            }

            let outputs = UnspentOutputSet::from_transaction(tx, txid, position.height);
            match index.get(&txid) {
                Some(&slot) => touched[slot].1 = outputs,
                None => {
                    index.insert(txid, touched.len());
                    touched.push((None, outputs));
                }
            }
        }

        let count = touched.len();
        let (originals, unspent): (Vec<_>, Vec<_>) = touched.into_iter().unzip();
        let seq = self
            .coins
            .save_changes(&position.prev_hash, position.to_tip(), unspent, originals)?;
        debug!(height = position.height, hash = %position.hash, count, "connected block to coinview");
        Ok(seq)
    }

    /// Move the coinview towards the archive tip, applying at most `limit`
    /// blocks. Commits that left the best chain are rewound first.
    pub fn catch_up(&self, limit: u64) -> Result<CatchUpReport, CoinError> {
        let mut report = CatchUpReport::default();

        let coin_tip = self.coins.tip();
        if self.chain.get(&coin_tip.hash).is_none() && self.chain.tip().chain_work < coin_tip.chain_work {
            debug!(height = coin_tip.height, "header chain behind coinview");
            return Ok(report);
        }

        while !self.chain.contains(&self.coins.tip().hash) {
            self.coins.rewind()?;
            report.rewound += 1;
        }

        let archive_tip = self.blocks.tip();
        while report.applied < limit {
            let tip = self.coins.tip();
            if tip.height >= archive_tip.height {
                break;
            }
            let Some(next) = self.chain.header_at(tip.height + 1) else {
                break;
            };
            // Only follow blocks the archive has committed on this chain.
            if !self.chain.is_ancestor(&next.hash, &archive_tip.hash) {
                break;
            }
            let block = self
                .blocks
                .get(&next.hash)?
                .ok_or(CoinError::MissingBlock(next.hash))?;
            self.apply_block(&next, &block)?;
            report.applied += 1;
        }

        if report.applied > 0 || report.rewound > 0 {
            info!(
                applied = report.applied,
                rewound = report.rewound,
                height = self.coins.tip().height,
                "coinview caught up"
            );
        }
        Ok(report)
    }
}
