//! Shared test helpers for E2E and property tests.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use strand_core::genesis::genesis_position;
use strand_core::types::*;
use strand_node_lib::{Node, NodeConfig};
use strand_store::StoreConfig;
use strand_sync::{SyncConfig, SyncOutcome};

/// Create a coinbase transaction unique to `(height, tag)`.
pub fn make_coinbase(value: u64, height: u64, tag: u8) -> Transaction {
    let mut marker = height.to_le_bytes().to_vec();
    marker.push(tag);
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            script_sig: marker,
        }],
        outputs: vec![TxOutput {
            value,
            script_pubkey: vec![0x51, tag],
        }],
        lock_time: height,
    }
}

/// Create a spending transaction.
pub fn make_tx(inputs: Vec<OutPoint>, values: &[u64]) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs
            .into_iter()
            .map(|op| TxInput {
                previous_output: op,
                script_sig: vec![0; 16],
            })
            .collect(),
        outputs: values
            .iter()
            .map(|&value| TxOutput {
                value,
                script_pubkey: vec![0x52],
            })
            .collect(),
        lock_time: 0,
    }
}

/// Create a block on `prev_hash` at the easiest target.
pub fn make_block(prev_hash: Hash256, height: u64, tag: u8, txs: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: Hash256([tag; 32]),
            timestamp: 1_767_225_600 + height * 60,
            difficulty_target: u64::MAX,
            nonce: height,
        },
        transactions: txs,
    }
}

/// Build `count` coinbase-only blocks on `parent` (at `parent_height`).
pub fn build_branch(parent: Hash256, parent_height: u64, count: u64, tag: u8) -> Vec<Block> {
    let mut prev = parent;
    (1..=count)
        .map(|i| {
            let height = parent_height + i;
            let block = make_block(prev, height, tag, vec![make_coinbase(50, height, tag)]);
            prev = block.hash();
            block
        })
        .collect()
}

/// First output of a transaction.
pub fn outpoint(tx: &Transaction, index: u32) -> OutPoint {
    OutPoint {
        txid: tx.txid().unwrap(),
        index,
    }
}

/// Node configuration tuned for tests: no fsync, instant stalls.
pub fn test_config(data_dir: &Path) -> NodeConfig {
    NodeConfig {
        data_dir: data_dir.to_path_buf(),
        store: StoreConfig::unbounded(),
        sync: SyncConfig {
            stall_threshold: 0,
            stall_backoff: Duration::from_millis(1),
            ..SyncConfig::default()
        },
        idle_backoff: Duration::from_millis(5),
        ..NodeConfig::default()
    }
}

/// A node in a temporary directory.
pub struct TestNode {
    pub node: Node,
    pub dir: TempDir,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut NodeConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);
        let node = Node::open(config).unwrap();
        Self { node, dir }
    }

    /// Connect headers for `blocks` and queue the blocks themselves.
    pub fn feed(&self, blocks: &[Block]) {
        self.feed_headers(blocks);
        self.feed_blocks(blocks);
    }

    pub fn feed_headers(&self, blocks: &[Block]) {
        for block in blocks {
            self.node.submit_header(&block.header).unwrap();
        }
    }

    pub fn feed_blocks(&self, blocks: &[Block]) {
        for block in blocks {
            assert!(self.node.submit_block(block.clone()), "download queue full");
        }
    }

    /// Run driver rounds until one backs off without connecting coins.
    pub fn sync(&self) -> SyncOutcome {
        for _ in 0..64 {
            let (outcome, report) = self.node.sync_once().unwrap();
            if matches!(outcome, SyncOutcome::Backoff(_)) && report.applied == 0 {
                return outcome;
            }
        }
        panic!("node did not settle");
    }

    /// Sorted coinview contents.
    pub fn coins(&self) -> Vec<UnspentOutputSet> {
        self.node.coins().coins().unwrap()
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash of the genesis block.
pub fn genesis() -> Hash256 {
    genesis_position().hash
}
