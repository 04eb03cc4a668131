//! Property-based tests across the whole sync path.
//!
//! Each case opens RocksDB stores, so case counts are kept modest.

use proptest::prelude::*;

use strand_core::traits::ChainView;
use strand_core::types::*;
use strand_tests::helpers::*;

/// A block that spends every listed coinbase of its own branch in full.
fn spending_block(prev: Hash256, height: u64, tag: u8, spent: &[Transaction]) -> Block {
    let mut txs = vec![make_coinbase(50, height, tag)];
    if !spent.is_empty() {
        let inputs = spent.iter().map(|tx| outpoint(tx, 0)).collect();
        txs.push(make_tx(inputs, &[spent.len() as u64 * 50 - 1]));
    }
    make_block(prev, height, tag, txs)
}

/// Build a branch on `parent` where block `i` spends the coinbase of block
/// `i - lag` when `spend_mask` says so.
fn branch_with_spends(
    parent: Hash256,
    parent_height: u64,
    count: u64,
    tag: u8,
    spend_mask: &[bool],
) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut prev = parent;
    for i in 0..count {
        let height = parent_height + i + 1;
        let spent: Vec<Transaction> = match i.checked_sub(2) {
            Some(j) if spend_mask.get(i as usize).copied().unwrap_or(false) => {
                vec![blocks[j as usize].transactions[0].clone()]
            }
            _ => vec![],
        };
        let block = spending_block(prev, height, tag, &spent);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Whatever branch storage followed first, after a reorg both stores
    /// match a node that only ever saw the winning chain.
    #[test]
    fn reorg_converges_to_fresh_sync(
        a_len in 1u64..8,
        fork_back in 0u64..8,
        extra in 1u64..4,
        spends_a in prop::collection::vec(any::<bool>(), 12),
        spends_b in prop::collection::vec(any::<bool>(), 12),
    ) {
        let fork_height = a_len - fork_back.min(a_len);
        let a = branch_with_spends(genesis(), 0, a_len, 1, &spends_a);
        let fork_hash = if fork_height == 0 { genesis() } else { a[fork_height as usize - 1].hash() };
        let b_len = a_len - fork_height + extra;
        let b = branch_with_spends(fork_hash, fork_height, b_len, 2, &spends_b);

        let reorged = TestNode::new();
        reorged.feed(&a);
        reorged.sync();
        reorged.feed(&b);
        reorged.sync();

        let fresh = TestNode::new();
        fresh.feed(&a[..fork_height as usize]);
        fresh.feed(&b);
        fresh.sync();

        let tip = reorged.node.chain().tip().to_tip();
        prop_assert_eq!(tip.hash, b[b.len() - 1].hash());
        prop_assert_eq!(reorged.node.blocks().tip(), tip);
        prop_assert_eq!(reorged.node.coins().tip(), tip);
        prop_assert_eq!(reorged.coins(), fresh.coins());
        prop_assert_eq!(reorged.node.blocks().len().unwrap(), fresh.node.blocks().len().unwrap());
    }

    /// Rewinding every coinview commit returns it to the empty genesis state.
    #[test]
    fn coinview_rewinds_to_genesis(len in 1u64..8, spends in prop::collection::vec(any::<bool>(), 8)) {
        let t = TestNode::new();
        let blocks = branch_with_spends(genesis(), 0, len, 1, &spends);
        t.feed(&blocks);
        t.sync();

        let genesis_tip = t.node.coins().rewind_depth().unwrap();
        prop_assert_eq!(genesis_tip, len);
        for _ in 0..len {
            t.node.coins().rewind().unwrap();
        }
        prop_assert!(t.coins().is_empty());
        prop_assert_eq!(t.node.coins().tip().hash, genesis());
    }
}
