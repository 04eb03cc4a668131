//! Unspent-output set keyed by transaction id.

use std::path::Path;

use tracing::{debug, warn};

use strand_core::error::StoreError;
use strand_core::types::{ChainedPosition, Hash256, TipPointer, UnspentOutputSet};

use crate::config::StoreConfig;
use crate::ledger::{RewindLedger, UndoRecord};

const NAMESPACE: &str = "coinview";

/// Result of a batched coin lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchCoinsResponse {
    /// Coinview tip at the moment the coins were read.
    pub tip: TipPointer,
    /// One slot per requested id; `None` means fully spent or never seen.
    pub coins: Vec<Option<UnspentOutputSet>>,
}

/// Durable, rewindable UTXO set.
///
/// Fully spent transactions are deleted as soon as the commit that spends
/// their last output lands; the undo record keeps their prior state.
pub struct CoinView {
    ledger: RewindLedger,
}

impl CoinView {
    pub fn open(
        path: impl AsRef<Path>,
        genesis: &ChainedPosition,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let ledger = RewindLedger::open(path, NAMESPACE, genesis.to_tip(), config)?;
        Ok(Self { ledger })
    }

    /// Current coinview tip.
    pub fn tip(&self) -> TipPointer {
        self.ledger.tip()
    }

    /// Accumulated chain work at the coinview tip.
    pub fn total_work(&self) -> u128 {
        self.ledger.tip().chain_work
    }

    /// Read the unspent outputs of several transactions from one snapshot.
    pub fn fetch_coins(&self, txids: &[Hash256]) -> Result<FetchCoinsResponse, StoreError> {
        let keys: Vec<&[u8]> = txids.iter().map(|id| id.as_bytes().as_slice()).collect();
        let (tip, raw) = self.ledger.get_many(&keys)?;
        let coins = raw
            .into_iter()
            .map(|value| value.map(|bytes| self.ledger.decode(&bytes)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FetchCoinsResponse { tip, coins })
    }

    /// Commit one block's worth of coin changes.
    ///
    /// `unspent[i]` is the post-block state of a touched transaction and
    /// `originals[i]` its pre-block state (`None` if the transaction is new).
    /// Sets left with no unspent outputs are deleted; the undo record
    /// restores every original and removes every newly created set.
    pub fn save_changes(
        &self,
        old_tip: &Hash256,
        new_tip: TipPointer,
        unspent: Vec<UnspentOutputSet>,
        originals: Vec<Option<UnspentOutputSet>>,
    ) -> Result<u64, StoreError> {
        if unspent.len() != originals.len() {
            return Err(StoreError::InvalidArgument(format!(
                "coin changes misaligned: {} sets, {} originals",
                unspent.len(),
                originals.len()
            )));
        }

        let mut upserts = Vec::new();
        let mut deletions = Vec::new();
        let mut undo = UndoRecord::default();

        for (current, original) in unspent.into_iter().zip(originals) {
            let key = current.txid.as_bytes().to_vec();
            match (current.is_pruned(), original) {
                // Created and fully spent within the same block.
                (true, None) => continue,
                (true, Some(original)) => {
                    undo.restore.push((key.clone(), encode(&original)?));
                    deletions.push(key);
                }
                (false, Some(original)) => {
                    undo.restore.push((key.clone(), encode(&original)?));
                    upserts.push((key, encode(&current)?));
                }
                (false, None) => {
                    undo.remove.push(key.clone());
                    upserts.push((key, encode(&current)?));
                }
            }
        }

        let (updated, pruned) = (upserts.len(), deletions.len());
        let seq = self.ledger.commit(old_tip, new_tip, upserts, deletions, undo)?;
        debug!(height = new_tip.height, hash = %new_tip.hash, updated, pruned, "saved coin changes");
        Ok(seq)
    }

    /// Undo the most recent coinview commit, resurrecting pruned sets.
    pub fn rewind(&self) -> Result<TipPointer, StoreError> {
        let tip = self.ledger.rewind()?;
        warn!(height = tip.height, hash = %tip.hash, "coinview rewound");
        Ok(tip)
    }

    pub fn rewind_depth(&self) -> Result<u64, StoreError> {
        self.ledger.rewind_depth()
    }

    /// Every unspent set, ordered by txid.
    pub fn coins(&self) -> Result<Vec<UnspentOutputSet>, StoreError> {
        self.ledger
            .entries()?
            .into_iter()
            .map(|(_, bytes)| self.ledger.decode(&bytes))
            .collect()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.ledger.flush()
    }
}

fn encode(set: &UnspentOutputSet) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(set, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}
