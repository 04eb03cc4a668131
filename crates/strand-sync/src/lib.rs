//! # strand-sync
//! Step-driven synchronization of the block archive with the best chain.
//!
//! The [`SyncPipeline`] repeatedly runs the [`Step`] sequence against the
//! position after its cursor, draining blocks from a [`BlockSource`] into the
//! archive in batches and repairing storage when the best chain reorganizes.
//!
//! [`BlockSource`]: strand_core::traits::BlockSource

pub mod config;
pub mod pending;
pub mod pipeline;
pub mod shutdown;
pub mod source;
pub mod stall;
pub mod step;

pub use config::SyncConfig;
pub use pending::PendingStorageBuffer;
pub use pipeline::{SyncOutcome, SyncPipeline};
pub use shutdown::ShutdownSignal;
pub use source::DownloadQueue;
pub use stall::StallCounter;
pub use step::{ReorgReport, Step, StepSignal, StopReason, SyncContext, SyncState, SyncStats};
