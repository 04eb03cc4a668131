//! Genesis block definition.
//!
//! Every node computes the identical genesis block. The genesis block is the
//! starting tip of both stores; it is never written into the archive and its
//! coinbase is not spendable.

use std::sync::LazyLock;

use crate::types::{
    Block, BlockHeader, ChainedPosition, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Message embedded in the genesis coinbase.
pub const GENESIS_MESSAGE: &[u8] = b"Strand genesis: two stores, one tip.";

struct GenesisData {
    block: Block,
    position: ChainedPosition,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

fn build_genesis() -> GenesisData {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            script_sig: GENESIS_MESSAGE.to_vec(),
        }],
        outputs: vec![TxOutput {
            value: 0,
            script_pubkey: vec![0x6a],
        }],
        lock_time: 0,
    };
    let merkle_root = Hash256(blake3::hash(GENESIS_MESSAGE).into());

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: GENESIS_TIMESTAMP,
            difficulty_target: u64::MAX,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let position = ChainedPosition {
        hash: block.header.hash(),
        height: 0,
        prev_hash: Hash256::ZERO,
        chain_work: block.header.work(),
    };

    GenesisData { block, position }
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.position.hash
}

/// The genesis chain position.
pub fn genesis_position() -> ChainedPosition {
    GENESIS.position.clone()
}
