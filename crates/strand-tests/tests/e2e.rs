//! End-to-end tests: a full node syncing, reorganizing and restarting.

use strand_core::error::StoreError;
use strand_core::traits::ChainView;
use strand_core::types::*;
use strand_node_lib::Node;
use strand_sync::{StopReason, SyncOutcome};
use strand_tests::helpers::*;

#[test]
fn sync_from_genesis_builds_archive_and_coinview() {
    let t = TestNode::new();
    let blocks = build_branch(genesis(), 0, 6, 1);
    t.feed(&blocks);

    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::CaughtUp));
    let tip = t.node.chain().tip();
    assert_eq!(t.node.blocks().tip(), tip.to_tip());
    assert_eq!(t.node.coins().tip(), tip.to_tip());
    assert_eq!(t.node.coins().total_work(), tip.chain_work);
    assert_eq!(t.node.blocks().len().unwrap(), 6);
    assert_eq!(t.coins().len(), 6);
}

#[test]
fn spends_flow_through_to_coinview() {
    let t = TestNode::new();
    let b1 = build_branch(genesis(), 0, 1, 1);
    let cb1 = b1[0].transactions[0].clone();

    let pay = make_tx(vec![outpoint(&cb1, 0)], &[20, 30]);
    let b2 = make_block(b1[0].hash(), 2, 1, vec![make_coinbase(50, 2, 1), pay.clone()]);
    let sweep = make_tx(vec![outpoint(&pay, 1)], &[29]);
    let b3 = make_block(b2.hash(), 3, 1, vec![make_coinbase(50, 3, 1), sweep.clone()]);

    t.feed(&[b1[0].clone(), b2, b3]);
    t.sync();

    let ids = [cb1.txid().unwrap(), pay.txid().unwrap(), sweep.txid().unwrap()];
    let coins = t.node.coins().fetch_coins(&ids).unwrap().coins;
    assert!(coins[0].is_none(), "fully spent coinbase must be pruned");
    let pay_set = coins[1].as_ref().unwrap();
    assert_eq!(pay_set.output(0).unwrap().value, 20);
    assert!(pay_set.output(1).is_none());
    assert_eq!(coins[2].as_ref().unwrap().output(0).unwrap().value, 29);
}

#[test]
fn blocks_arriving_in_reverse_order_still_sync() {
    let t = TestNode::new();
    let blocks = build_branch(genesis(), 0, 8, 1);
    t.feed_headers(&blocks);
    for block in blocks.iter().rev() {
        assert!(t.node.submit_block(block.clone()));
    }

    t.sync();
    assert_eq!(t.node.blocks().tip(), t.node.chain().tip().to_tip());
    assert_eq!(t.node.coins().tip(), t.node.chain().tip().to_tip());
}

#[test]
fn late_blocks_resume_after_stall() {
    let t = TestNode::new();
    let blocks = build_branch(genesis(), 0, 6, 1);
    t.feed_headers(&blocks);
    t.feed_blocks(&blocks[..3]);

    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::Stalled));
    assert_eq!(t.node.blocks().tip().height, 3);

    t.feed_blocks(&blocks[3..]);
    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::CaughtUp));
    assert_eq!(t.node.blocks().tip().height, 6);
    assert_eq!(t.node.coins().tip().height, 6);
}

#[test]
fn archived_blocks_do_not_clog_the_download_queue() {
    let t = TestNode::with_config(|config| config.queue_capacity = 1);
    let blocks = build_branch(genesis(), 0, 2, 1);
    t.feed_headers(&blocks);
    t.feed_blocks(&blocks[..1]);
    t.sync();
    assert_eq!(t.node.blocks().tip().height, 1);

    // A late duplicate of a block that is already archived.
    assert!(t.node.submit_block(blocks[0].clone()));
    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::Stalled));
    assert!(t.node.queue().is_empty());

    assert!(t.node.submit_block(blocks[1].clone()));
    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::CaughtUp));
    assert_eq!(t.node.blocks().tip().hash, blocks[1].hash());
}

#[test]
fn stale_fork_blocks_are_evicted_from_the_download_queue() {
    let t = TestNode::new();
    let stale = build_branch(genesis(), 0, 2, 1);
    let best = build_branch(genesis(), 0, 3, 2);
    t.feed_headers(&stale);
    t.feed_headers(&best);
    t.feed_blocks(&stale);
    t.feed_blocks(&best);

    t.sync();
    assert_eq!(t.node.blocks().tip().hash, best[2].hash());
    assert!(t.node.queue().is_empty());
    assert!(!t.node.blocks().exists(&stale[0].hash()).unwrap());
}

#[test]
fn reorg_leaves_same_state_as_syncing_the_winning_branch() {
    let a = build_branch(genesis(), 0, 10, 1);
    let b = build_branch(a[7].hash(), 8, 4, 2);

    let reorged = TestNode::new();
    reorged.feed(&a);
    reorged.sync();
    assert_eq!(reorged.node.blocks().tip().height, 10);

    reorged.feed(&b);
    reorged.sync();

    let fresh = TestNode::new();
    fresh.feed(&a[..8]);
    fresh.feed(&b);
    fresh.sync();

    let tip = reorged.node.chain().tip();
    assert_eq!(tip.height, 12);
    assert_eq!(reorged.node.blocks().tip(), tip.to_tip());
    assert_eq!(reorged.node.coins().tip(), tip.to_tip());
    assert_eq!(reorged.coins(), fresh.coins());
    assert!(!reorged.node.blocks().exists(&a[8].hash()).unwrap());
    assert!(!reorged.node.blocks().exists(&a[9].hash()).unwrap());

    let stats = reorged.node.sync_stats();
    assert_eq!(stats.reorgs, 1);
    assert_eq!(stats.blocks_removed, 2);
}

#[test]
fn reorg_resurrects_coins_spent_on_losing_branch() {
    let base = build_branch(genesis(), 0, 2, 1);
    let cb = base[0].transactions[0].clone();
    let cb_id = cb.txid().unwrap();

    // Branch A spends the height-1 coinbase completely.
    let spend = make_tx(vec![outpoint(&cb, 0)], &[49]);
    let a3 = make_block(base[1].hash(), 3, 1, vec![make_coinbase(50, 3, 1), spend]);

    let t = TestNode::new();
    t.feed(&base);
    t.sync();
    let before = t.node.coins().fetch_coins(&[cb_id]).unwrap().coins[0].clone();
    assert!(before.is_some());

    t.feed(&[a3]);
    t.sync();
    assert_eq!(t.node.coins().fetch_coins(&[cb_id]).unwrap().coins, vec![None]);

    // Branch B, heavier, never spends it.
    let b = build_branch(base[1].hash(), 2, 2, 2);
    t.feed(&b);
    t.sync();

    assert_eq!(t.node.coins().tip().hash, b[1].hash());
    let after = t.node.coins().fetch_coins(&[cb_id]).unwrap().coins[0].clone();
    assert_eq!(after, before);
}

#[test]
fn restart_preserves_both_tips_and_continues() {
    let blocks = build_branch(genesis(), 0, 5, 1);
    let t = TestNode::new();
    t.feed(&blocks[..3]);
    t.sync();
    let config = t.node.config().clone();
    let TestNode { node, dir } = t;
    drop(node);

    let node = Node::open(config).unwrap();
    let t = TestNode { node, dir };
    assert_eq!(t.node.blocks().tip().height, 3);
    assert_eq!(t.node.coins().tip().height, 3);

    // A restarted node re-learns headers; archived blocks are not fetched again.
    t.feed_headers(&blocks);
    t.feed_blocks(&blocks[3..]);
    t.sync();
    assert_eq!(t.node.blocks().tip().hash, blocks[4].hash());
    assert_eq!(t.node.coins().tip().hash, blocks[4].hash());
    assert_eq!(t.node.sync_stats().blocks_stored, 2);
}

#[test]
fn restart_waits_for_headers_before_touching_storage() {
    let blocks = build_branch(genesis(), 0, 4, 1);
    let t = TestNode::new();
    t.feed(&blocks);
    t.sync();
    let config = t.node.config().clone();
    let TestNode { node, dir } = t;
    drop(node);

    let t = TestNode {
        node: Node::open(config).unwrap(),
        dir,
    };
    // Only genesis is known: both stores must be left alone.
    assert_eq!(t.sync(), SyncOutcome::Backoff(StopReason::CaughtUp));
    assert_eq!(t.node.blocks().tip().hash, blocks[3].hash());
    assert_eq!(t.node.coins().tip().hash, blocks[3].hash());
    assert_eq!(t.node.sync_stats().reorgs, 0);

    t.feed_headers(&blocks[..2]);
    t.sync();
    assert_eq!(t.node.blocks().len().unwrap(), 4);

    t.feed_headers(&blocks[2..]);
    t.sync();
    assert_eq!(t.node.blocks().tip().hash, blocks[3].hash());
    assert_eq!(t.node.coins().coins().unwrap().len(), 4);
}

#[test]
fn reorg_deeper_than_retained_history_is_fatal() {
    let t = TestNode::with_config(|config| config.store.max_reorg_depth = 2);
    let a = build_branch(genesis(), 0, 6, 1);
    t.feed(&a);
    t.sync();
    assert_eq!(t.node.coins().tip().height, 6);

    // Fork at height 2: the coinview would need four rewinds.
    let b = build_branch(a[1].hash(), 2, 6, 2);
    t.feed(&b);

    let err = t.node.sync_once().unwrap_err();
    assert_eq!(
        err.store_error(),
        Some(&StoreError::RewindHorizonExceeded { max_depth: 2 })
    );
}

#[test]
fn coinview_trails_archive_only_within_catch_up_limit() {
    let t = TestNode::with_config(|config| config.coin_catch_up_limit = 2);
    let blocks = build_branch(genesis(), 0, 5, 1);
    t.feed(&blocks);

    let (_, report) = t.node.sync_once().unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(t.node.blocks().tip().height, 5);
    assert_eq!(t.node.coins().tip().height, 2);

    t.sync();
    assert_eq!(t.node.coins().tip().height, 5);
}

#[test]
fn archive_and_coinview_rewind_independently() {
    let t = TestNode::new();
    let blocks = build_branch(genesis(), 0, 3, 1);
    t.feed(&blocks);
    t.sync();

    let depth = t.node.coins().rewind_depth().unwrap();
    assert_eq!(depth, 3);
    let tip: TipPointer = t.node.coins().rewind().unwrap();
    assert_eq!(tip.height, 2);
    assert_eq!(t.node.blocks().tip().height, 3);

    // The next round reconnects the block from the archive.
    t.sync();
    assert_eq!(t.node.coins().tip().height, 3);
}
