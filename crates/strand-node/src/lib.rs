//! # strand-node — Full node composition.
//!
//! - [`config::NodeConfig`] — layered node configuration
//! - [`coins::CoinUpdater`] — keeps the coinview following the block archive
//! - [`node::Node`] — wires chain, queue, stores and pipeline; runs the driver

pub mod coins;
pub mod config;
pub mod node;

pub use coins::{CatchUpReport, CoinUpdater};
pub use config::NodeConfig;
pub use node::{Node, load_blocks, save_blocks};
