//! # strand-store
//! Rewindable RocksDB stores for the Strand node.
//!
//! Both the raw block archive and the coinview sit on a [`RewindLedger`]:
//! every commit moves the store tip and records how to undo itself, and
//! every rewind pops exactly one such record.

pub mod block_store;
pub mod coinview;
pub mod config;
pub mod ledger;

pub use block_store::BlockStore;
pub use coinview::{CoinView, FetchCoinsResponse};
pub use config::StoreConfig;
pub use ledger::{RewindDelta, RewindLedger, UndoRecord};
