//! Pipeline driver.

use tracing::{debug, info};

use strand_core::error::SyncError;
use strand_core::types::TipPointer;

use crate::step::{ReorgReport, Step, StepSignal, StopReason, SyncContext, SyncState, SyncStats};

/// Result of one driver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Work was done that may unlock more; call again right away.
    Progress(StopReason),
    /// Nothing to do for now; back off before calling again.
    Backoff(StopReason),
}

impl SyncOutcome {
    pub fn reason(&self) -> StopReason {
        match self {
            Self::Progress(reason) | Self::Backoff(reason) => *reason,
        }
    }
}

/// Drives the step sequence against the block archive.
pub struct SyncPipeline {
    ctx: SyncContext,
    /// `None` until the first run and after a fatal error.
    state: Option<SyncState>,
}

impl SyncPipeline {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx, state: None }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run passes until a step stops, then flush and yield.
    ///
    /// Errors are fatal: the in-memory state is dropped and the stores are
    /// left exactly as their last successful commit left them.
    pub fn run_once(&mut self) -> Result<SyncOutcome, SyncError> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => SyncState::new(self.ctx.blocks.tip(), &self.ctx.config),
        };

        // Cancellation is observed before every step.
        let reason = loop {
            state.next = self.ctx.chain.header_at(state.cursor.height + 1);

            let mut signal = StepSignal::Next;
            for step in Step::ORDER {
                if self.ctx.shutdown.is_triggered() {
                    signal = StepSignal::Stop(StopReason::Cancelled);
                    break;
                }
                let (updated, step_signal) = step.execute(&self.ctx, state)?;
                state = updated;
                signal = step_signal;
                if signal != StepSignal::Next {
                    debug!(?step, ?signal, height = state.cursor.height, "step signalled");
                    break;
                }
            }
            if let StepSignal::Stop(reason) = signal {
                break reason;
            }
        };

        // Never yield with blocks acknowledged only in memory.
        state.flush(&self.ctx)?;

        let outcome = match reason {
            StopReason::Reorganized => SyncOutcome::Progress(reason),
            StopReason::Stalled | StopReason::CaughtUp | StopReason::Cancelled => {
                SyncOutcome::Backoff(reason)
            }
        };
        info!(
            ?reason,
            height = state.cursor.height,
            pending = state.pending.len(),
            stored = state.stats.blocks_stored,
            stalls = state.stats.stalls,
            "sync pipeline yielded"
        );
        self.state = Some(state);
        Ok(outcome)
    }

    /// Position the pipeline has handed to storage.
    pub fn cursor(&self) -> TipPointer {
        match &self.state {
            Some(state) => state.cursor,
            None => self.ctx.blocks.tip(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.state
            .as_ref()
            .map(|state| state.stats.clone())
            .unwrap_or_default()
    }

    pub fn last_reorg(&self) -> Option<&ReorgReport> {
        self.state.as_ref()?.last_reorg.as_ref()
    }

    /// Number of out-of-order blocks held in memory.
    pub fn pending_len(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.pending.len())
    }

    /// Current stall threshold.
    pub fn stall_threshold(&self) -> u32 {
        self.state
            .as_ref()
            .map_or(self.ctx.config.stall_threshold, |state| state.stall.threshold())
    }
}
