//! Core chain types: hashes, headers, blocks, chain positions and coins.
//!
//! Transaction ids are BLAKE3 over the canonical bincode encoding; block
//! hashes are double SHA-256 over a fixed header layout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::StoreError;

/// A 32-byte hash value.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Build a hash from a raw key slice. Returns `None` unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Unlocking script. Opaque to this node; validated upstream.
    pub script_sig: Vec<u8>,
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Output value in base units.
    pub value: u64,
    /// Locking script.
    pub script_pubkey: Vec<u8>,
}

/// A transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
}

impl Transaction {
    /// Compute the transaction id (BLAKE3 of the canonical encoding).
    pub fn txid(&self) -> Result<Hash256, StoreError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// A coinbase has a single input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }
}

/// Block header.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub version: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Proof-of-work target. Lower is harder.
    pub difficulty_target: u64,
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing.
    const HASH_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the header hash (double SHA-256).
    ///
    /// Layout: version || prev_hash || merkle_root || timestamp ||
    /// difficulty_target || nonce, integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }

    /// Expected number of hashes needed to meet this header's target.
    ///
    /// The easiest possible target (`u64::MAX`) is worth exactly 1.
    pub fn work(&self) -> u128 {
        (u128::from(u64::MAX) + 1) / (u128::from(self.difficulty_target) + 1)
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered transactions. The first is the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Hash of this block's header.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

/// A position on a header chain, as produced by a [`ChainView`](crate::traits::ChainView).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct ChainedPosition {
    pub hash: Hash256,
    pub height: u64,
    pub prev_hash: Hash256,
    /// Accumulated work from genesis up to and including this block.
    pub chain_work: u128,
}

impl ChainedPosition {
    /// The tip pointer a store holds once it has committed this position.
    pub fn to_tip(&self) -> TipPointer {
        TipPointer {
            hash: self.hash,
            height: self.height,
            chain_work: self.chain_work,
        }
    }
}

impl fmt::Display for ChainedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.height)
    }
}

/// The persisted tip of a store.
///
/// Tip equality for the commit guard is decided on `hash` alone; height and
/// work ride along so the store can answer "where am I" without a chain.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct TipPointer {
    pub hash: Hash256,
    pub height: u64,
    pub chain_work: u128,
}

impl From<&ChainedPosition> for TipPointer {
    fn from(pos: &ChainedPosition) -> Self {
        pos.to_tip()
    }
}

/// A block in its serialized, storage-ready form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlock {
    pub hash: Hash256,
    pub bytes: Vec<u8>,
}

impl StoredBlock {
    /// Serialize a block for the archive.
    pub fn encode(block: &Block) -> Result<Self, StoreError> {
        let bytes = bincode::encode_to_vec(block, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok(Self {
            hash: block.hash(),
            bytes,
        })
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Unspent outputs of a single transaction.
///
/// `outputs` is sparse: a spent output becomes `None`. Trailing spent
/// outputs are trimmed, so a fully spent set has no outputs at all.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutputSet {
    pub txid: Hash256,
    /// Height of the block that created the transaction.
    pub height: u64,
    pub is_coinbase: bool,
    pub outputs: Vec<Option<TxOutput>>,
}

impl UnspentOutputSet {
    /// All outputs of a freshly confirmed transaction.
    pub fn from_transaction(tx: &Transaction, txid: Hash256, height: u64) -> Self {
        let mut set = Self {
            txid,
            height,
            is_coinbase: tx.is_coinbase(),
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        };
        set.trim();
        set
    }

    /// Unspent output at `index`, if any.
    pub fn output(&self, index: u32) -> Option<&TxOutput> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    /// Mark the output at `index` spent, returning it.
    pub fn spend(&mut self, index: u32) -> Option<TxOutput> {
        let spent = self.outputs.get_mut(index as usize)?.take();
        self.trim();
        spent
    }

    /// Number of outputs still unspent.
    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    /// True once every output has been spent.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    fn trim(&mut self) {
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
    }
}
