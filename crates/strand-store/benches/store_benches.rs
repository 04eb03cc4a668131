//! Criterion benchmarks for strand-store.
//!
//! Covers: batched block commits, rewind, and coin lookup.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use strand_core::types::{
    Block, BlockHeader, ChainedPosition, Hash256, OutPoint, StoredBlock, Transaction, TxInput,
    TxOutput, UnspentOutputSet,
};
use strand_store::{BlockStore, CoinView, StoreConfig};

fn genesis() -> ChainedPosition {
    ChainedPosition {
        hash: Hash256([0xAA; 32]),
        height: 0,
        prev_hash: Hash256::ZERO,
        chain_work: 1,
    }
}

/// Build `count` chained blocks above `parent`, each with one coinbase.
fn build_run(parent: &ChainedPosition, count: u64) -> Vec<(ChainedPosition, StoredBlock)> {
    let mut prev = parent.clone();
    (1..=count)
        .map(|i| {
            let block = Block {
                header: BlockHeader {
                    version: 1,
                    prev_hash: prev.hash,
                    merkle_root: Hash256::ZERO,
                    timestamp: 1_700_000_000 + i * 60,
                    difficulty_target: u64::MAX,
                    nonce: i,
                },
                transactions: vec![Transaction {
                    version: 1,
                    inputs: vec![TxInput {
                        previous_output: OutPoint::null(),
                        script_sig: i.to_le_bytes().to_vec(),
                    }],
                    outputs: vec![TxOutput {
                        value: 50,
                        script_pubkey: vec![0xAB; 25],
                    }],
                    lock_time: i,
                }],
            };
            let stored = StoredBlock::encode(&block).unwrap();
            let pos = ChainedPosition {
                hash: stored.hash,
                height: prev.height + 1,
                prev_hash: prev.hash,
                chain_work: prev.chain_work + 1,
            };
            prev = pos.clone();
            (pos, stored)
        })
        .collect()
}

fn bench_put_batch(c: &mut Criterion) {
    c.bench_function("put_batch_64", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let store =
                    BlockStore::open(dir.path(), &genesis(), &StoreConfig::unbounded()).unwrap();
                let run = build_run(&genesis(), 64);
                (dir, store, run)
            },
            |(_dir, store, run)| {
                let tip = run[run.len() - 1].0.clone();
                store.put_batch(black_box(&tip), black_box(&run)).unwrap();
            },
        )
    });
}

fn bench_rewind(c: &mut Criterion) {
    c.bench_function("rewind_batch_64", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let store =
                    BlockStore::open(dir.path(), &genesis(), &StoreConfig::unbounded()).unwrap();
                let run = build_run(&genesis(), 64);
                store.put_batch(&run[63].0, &run).unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                store.rewind().unwrap();
            },
        )
    });
}

fn bench_fetch_coins(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let view = CoinView::open(dir.path(), &genesis(), &StoreConfig::unbounded()).unwrap();

    let sets: Vec<UnspentOutputSet> = (0..256u32)
        .map(|i| {
            let mut txid = [0u8; 32];
            txid[..4].copy_from_slice(&i.to_le_bytes());
            UnspentOutputSet {
                txid: Hash256(txid),
                height: 1,
                is_coinbase: false,
                outputs: vec![Some(TxOutput {
                    value: i as u64,
                    script_pubkey: vec![0xCD; 25],
                })],
            }
        })
        .collect();
    let ids: Vec<Hash256> = sets.iter().map(|s| s.txid).collect();
    let originals = vec![None; sets.len()];
    let tip = build_run(&genesis(), 1)[0].0.to_tip();
    view.save_changes(&genesis().hash, tip, sets, originals).unwrap();

    c.bench_function("fetch_coins_256", |b| {
        b.iter(|| view.fetch_coins(black_box(&ids)).unwrap())
    });
}

criterion_group!(benches, bench_put_batch, bench_rewind, bench_fetch_coins);
criterion_main!(benches);
