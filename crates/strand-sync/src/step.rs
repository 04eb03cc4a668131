//! Pipeline steps.
//!
//! Each step is a function from the current [`SyncState`] to the next state
//! plus a [`StepSignal`] telling the driver what to do:
//!
//! - `Next`: run the following step (after the last step, start a new pass)
//! - `Continue`: skip the remaining steps and start a new pass
//! - `Stop`: yield to the caller of the driver
//!
//! A pass always runs against `next`, the best-chain position immediately
//! after the pipeline cursor.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use strand_core::error::SyncError;
use strand_core::traits::{BlockSource, ChainView};
use strand_core::types::{ChainedPosition, Hash256, StoredBlock, TipPointer};
use strand_store::{BlockStore, CoinView};

use crate::config::SyncConfig;
use crate::pending::PendingStorageBuffer;
use crate::shutdown::ShutdownSignal;
use crate::stall::StallCounter;

/// Collaborators shared by every step. Read-only from the steps' view; all
/// mutation of the stores goes through their commit and rewind calls.
pub struct SyncContext {
    pub chain: Arc<dyn ChainView>,
    pub source: Arc<dyn BlockSource>,
    pub blocks: Arc<BlockStore>,
    /// Rewound alongside the archive during reorg repair, if present.
    pub coins: Option<Arc<CoinView>>,
    pub config: SyncConfig,
    pub shutdown: ShutdownSignal,
}

/// Why the pipeline yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Storage diverged from the best chain and was repaired.
    Reorganized,
    /// The block source missed more polls than the stall threshold allows.
    Stalled,
    /// The store holds every best-chain block.
    CaughtUp,
    /// Shutdown was requested.
    Cancelled,
}

/// Control-flow signal returned by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSignal {
    Next,
    Continue,
    Stop(StopReason),
}

/// Running totals, kept for the life of the pipeline state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub blocks_stored: u64,
    pub commits: u64,
    /// Tip moves onto blocks that were already archived.
    pub tip_advances: u64,
    pub reorgs: u64,
    pub blocks_removed: u64,
    pub stalls: u64,
    pub threshold_growths: u64,
}

/// What the last reorg repair did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgReport {
    /// Position storage was rolled back to.
    pub fork: TipPointer,
    /// Archived blocks deleted, lowest height first.
    pub removed: Vec<Hash256>,
    /// Batched, not yet committed blocks that were dropped.
    pub discarded: usize,
    /// Coinview commits undone.
    pub coin_rewinds: u64,
}

/// State threaded through the steps.
#[derive(Debug)]
pub struct SyncState {
    /// Last position handed to storage: the archive tip, or the last batched
    /// block when a batch is open.
    pub cursor: TipPointer,
    /// Best-chain position after `cursor`, refreshed at the start of a pass.
    pub next: Option<ChainedPosition>,
    pub pending: PendingStorageBuffer,
    /// Contiguous blocks above the archive tip awaiting one commit.
    pub batch: Vec<(ChainedPosition, StoredBlock)>,
    pub batch_bytes: usize,
    pub last_flush: Instant,
    pub stall: StallCounter,
    pub stats: SyncStats,
    pub last_reorg: Option<ReorgReport>,
}

impl SyncState {
    /// Fresh state positioned at the archive tip.
    pub fn new(tip: TipPointer, config: &SyncConfig) -> Self {
        Self {
            cursor: tip,
            next: None,
            pending: PendingStorageBuffer::new(),
            batch: Vec::new(),
            batch_bytes: 0,
            last_flush: Instant::now(),
            stall: StallCounter::new(config.stall_threshold),
            stats: SyncStats::default(),
            last_reorg: None,
        }
    }

    /// Commit the open batch, if any, as a single archive commit.
    pub fn flush(&mut self, ctx: &SyncContext) -> Result<(), SyncError> {
        self.last_flush = Instant::now();
        let Some((tip, _)) = self.batch.last() else {
            return Ok(());
        };
        let tip = tip.clone();
        ctx.blocks.put_batch(&tip, &self.batch)?;

        self.stats.commits += 1;
        self.stats.blocks_stored += self.batch.len() as u64;
        debug!(
            height = tip.height,
            count = self.batch.len(),
            bytes = self.batch_bytes,
            "flushed batch"
        );
        self.batch.clear();
        self.batch_bytes = 0;
        Ok(())
    }
}

/// The closed set of pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReorgDetection,
    ExistenceCheck,
    PendingStorageDrain,
    BlockAcquisition,
}

impl Step {
    /// Execution order within a pass.
    pub const ORDER: [Step; 4] = [
        Step::ReorgDetection,
        Step::ExistenceCheck,
        Step::PendingStorageDrain,
        Step::BlockAcquisition,
    ];

    pub fn execute(
        self,
        ctx: &SyncContext,
        state: SyncState,
    ) -> Result<(SyncState, StepSignal), SyncError> {
        match self {
            Step::ReorgDetection => reorg_detection(ctx, state),
            Step::ExistenceCheck => existence_check(ctx, state),
            Step::PendingStorageDrain => pending_storage_drain(ctx, state),
            Step::BlockAcquisition => block_acquisition(ctx, state),
        }
    }
}

/// Repair storage if the cursor fell off the best chain.
fn reorg_detection(
    ctx: &SyncContext,
    mut state: SyncState,
) -> Result<(SyncState, StepSignal), SyncError> {
    let best = ctx.chain.tip();
    if ctx.chain.is_ancestor(&state.cursor.hash, &best.hash) {
        return Ok((state, StepSignal::Next));
    }
    // Headers have not yet caught up with what storage holds (e.g. after a
    // restart). Nothing to repair until they do.
    if ctx.chain.get(&state.cursor.hash).is_none() && best.chain_work < state.cursor.chain_work {
        debug!(
            height = state.cursor.height,
            best_height = best.height,
            "header chain behind storage"
        );
        return Ok((state, StepSignal::Stop(StopReason::CaughtUp)));
    }
    info!(
        height = state.cursor.height,
        hash = %state.cursor.hash,
        best = %best.hash,
        "storage diverged from best chain"
    );

    // Batched blocks above the fork were never committed; drop them first.
    let mut discarded = 0;
    while let Some((position, block)) = state.batch.last() {
        if ctx.chain.contains(&position.hash) {
            break;
        }
        state.batch_bytes -= block.size();
        state.batch.pop();
        discarded += 1;
    }

    let mut removed = Vec::new();
    let fork = match state.batch.last() {
        Some((position, _)) => position.to_tip(),
        None => {
            let tip = ctx.blocks.tip();
            let mut hash = tip.hash;
            let mut height = tip.height;
            while !ctx.chain.contains(&hash) {
                if height == 0 {
                    return Err(SyncError::NoCommonAncestor(tip.hash));
                }
                let block = ctx
                    .blocks
                    .get(&hash)?
                    .ok_or(SyncError::MissingStoredBlock(hash))?;
                removed.push(hash);
                hash = block.header.prev_hash;
                height -= 1;
            }
            let fork = ctx
                .chain
                .get(&hash)
                .ok_or(SyncError::UnknownPosition(hash))?
                .to_tip();

            if !removed.is_empty() {
                removed.reverse();
                ctx.blocks.delete_range(&tip.hash, fork, &removed)?;
                state.stats.commits += 1;
            }
            fork
        }
    };

    let mut coin_rewinds = 0;
    if let Some(coins) = &ctx.coins {
        while !ctx.chain.is_ancestor(&coins.tip().hash, &fork.hash) {
            coins.rewind()?;
            coin_rewinds += 1;
        }
    }

    let dropped = state.pending.retain(|position| ctx.chain.contains(&position.hash));
    state.cursor = fork;
    state.stats.reorgs += 1;
    state.stats.blocks_removed += removed.len() as u64;
    info!(
        fork_height = fork.height,
        fork = %fork.hash,
        removed = removed.len(),
        discarded,
        coin_rewinds,
        dropped_pending = dropped,
        "reorg repaired"
    );
    state.last_reorg = Some(ReorgReport {
        fork,
        removed,
        discarded,
        coin_rewinds,
    });

    Ok((state, StepSignal::Stop(StopReason::Reorganized)))
}

/// Advance over `next` without fetching it if the archive already has it.
fn existence_check(
    ctx: &SyncContext,
    mut state: SyncState,
) -> Result<(SyncState, StepSignal), SyncError> {
    let Some(next) = state.next.clone() else {
        return Ok((state, StepSignal::Stop(StopReason::CaughtUp)));
    };
    if !ctx.blocks.exists(&next.hash)? {
        return Ok((state, StepSignal::Next));
    }

    // The tip move is a commit against the archive tip, so the batch must
    // land first.
    state.flush(ctx)?;
    ctx.blocks.set_tip(&state.cursor.hash, &next)?;
    state.pending.take(&next.hash);
    state.cursor = next.to_tip();
    state.stats.tip_advances += 1;
    debug!(height = next.height, hash = %next.hash, "block already archived, tip advanced");

    Ok((state, StepSignal::Continue))
}

/// Move contiguous held blocks starting at `next` into the batch, flushing
/// as the batch policy demands.
fn pending_storage_drain(
    ctx: &SyncContext,
    mut state: SyncState,
) -> Result<(SyncState, StepSignal), SyncError> {
    let Some(next) = state.next.clone() else {
        return Ok((state, StepSignal::Next));
    };
    if !state.pending.contains(&next.hash) {
        return Ok((state, StepSignal::Next));
    }

    let config = &ctx.config;
    let initial_sync =
        ctx.chain.tip().height > state.cursor.height + config.initial_sync_distance;

    let mut wanted = next.hash;
    let mut drained = 0usize;
    while let Some((position, block)) = state.pending.take(&wanted) {
        state.batch_bytes += block.size();
        state.cursor = position.to_tip();
        state.batch.push((position.clone(), block));
        drained += 1;

        let following = ctx.chain.header_at(position.height + 1);
        let must_flush = state.batch_bytes >= config.batch_max_bytes
            || state.last_flush.elapsed() >= config.batch_max_interval
            || !initial_sync
            || following.is_none();
        if must_flush {
            state.flush(ctx)?;
        }

        match following {
            Some(f) if f.prev_hash == position.hash => wanted = f.hash,
            _ => break,
        }
    }

    debug!(drained, batched = state.batch.len(), initial_sync, "drained pending blocks");
    Ok((state, StepSignal::Continue))
}

/// Poll the block source for `next`, backing off while it has nothing.
fn block_acquisition(
    ctx: &SyncContext,
    mut state: SyncState,
) -> Result<(SyncState, StepSignal), SyncError> {
    let Some(next) = state.next.clone() else {
        return Ok((state, StepSignal::Stop(StopReason::CaughtUp)));
    };

    loop {
        if ctx.shutdown.is_triggered() {
            return Ok((state, StepSignal::Stop(StopReason::Cancelled)));
        }

        match ctx.source.try_take(&next) {
            Some(block) if block.hash() == next.hash => {
                state.stall.reset();
                state.pending.insert(next.clone(), StoredBlock::encode(&block)?);
                lookahead(ctx, &mut state, &next)?;
                return Ok((state, StepSignal::Next));
            }
            Some(block) => {
                warn!(expected = %next.hash, got = %block.hash(), "block source returned wrong block");
            }
            None => {}
        }

        state.stats.stalls += 1;
        if state.stall.record() {
            state.stats.threshold_growths += 1;
            info!(
                height = next.height,
                threshold = state.stall.threshold(),
                "block source stalled, yielding"
            );
            return Ok((state, StepSignal::Stop(StopReason::Stalled)));
        }
        if ctx.shutdown.sleep(ctx.config.stall_backoff) {
            return Ok((state, StepSignal::Stop(StopReason::Cancelled)));
        }
    }
}

/// Stash blocks for the positions just after `from` that are already
/// available, without waiting.
fn lookahead(ctx: &SyncContext, state: &mut SyncState, from: &ChainedPosition) -> Result<(), SyncError> {
    for height in from.height + 1..=from.height + ctx.config.acquisition_lookahead {
        let Some(position) = ctx.chain.header_at(height) else {
            break;
        };
        if state.pending.contains(&position.hash) || ctx.blocks.exists(&position.hash)? {
            continue;
        }
        match ctx.source.try_take(&position) {
            Some(block) if block.hash() == position.hash => {
                state.pending.insert(position, StoredBlock::encode(&block)?);
            }
            Some(block) => {
                warn!(expected = %position.hash, got = %block.hash(), "block source returned wrong block");
            }
            None => {}
        }
    }
    Ok(())
}
