//! Full node composition and driver loop.
//!
//! The [`Node`] wires the header chain, the download queue, both stores and
//! the sync pipeline together. [`Node::run`] drives the pipeline on the
//! blocking thread pool and keeps the coinview following the archive until
//! shutdown or a fatal error.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use strand_core::chain::HeaderChain;
use strand_core::error::StrandError;
use strand_core::genesis::{genesis_block, genesis_position};
use strand_core::traits::ChainView;
use strand_core::types::{Block, BlockHeader, ChainedPosition};
use strand_store::{BlockStore, CoinView};
use strand_sync::{DownloadQueue, ShutdownSignal, SyncContext, SyncOutcome, SyncPipeline, SyncStats};

use crate::coins::{CatchUpReport, CoinUpdater};
use crate::config::NodeConfig;

/// Longest single async sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// The full node.
pub struct Node {
    config: NodeConfig,
    chain: Arc<HeaderChain>,
    queue: Arc<DownloadQueue>,
    blocks: Arc<BlockStore>,
    coins: Arc<CoinView>,
    pipeline: Arc<Mutex<SyncPipeline>>,
    updater: Arc<CoinUpdater>,
    shutdown: ShutdownSignal,
}

impl Node {
    /// Open both stores under `config.data_dir` and build the pipeline.
    pub fn open(config: NodeConfig) -> Result<Self, StrandError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let genesis = genesis_position();
        let blocks = Arc::new(BlockStore::open(config.blocks_path(), &genesis, &config.store)?);
        let coins = Arc::new(CoinView::open(config.coinview_path(), &genesis, &config.store)?);
        let chain = Arc::new(HeaderChain::new(&genesis_block().header));
        let queue = Arc::new(DownloadQueue::new(config.queue_capacity));
        let shutdown = ShutdownSignal::new();

        let pipeline = SyncPipeline::new(SyncContext {
            chain: chain.clone(),
            source: queue.clone(),
            blocks: blocks.clone(),
            coins: Some(coins.clone()),
            config: config.sync.clone(),
            shutdown: shutdown.clone(),
        });
        let updater = CoinUpdater::new(chain.clone(), blocks.clone(), coins.clone());

        info!(
            blocks_height = blocks.tip().height,
            blocks_tip = %blocks.tip().hash,
            coins_height = coins.tip().height,
            data_dir = %config.data_dir.display(),
            "node opened"
        );

        Ok(Self {
            config,
            chain,
            queue,
            blocks,
            coins,
            pipeline: Arc::new(Mutex::new(pipeline)),
            updater: Arc::new(updater),
            shutdown,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<HeaderChain> {
        &self.chain
    }

    pub fn queue(&self) -> &Arc<DownloadQueue> {
        &self.queue
    }

    pub fn blocks(&self) -> &Arc<BlockStore> {
        &self.blocks
    }

    pub fn coins(&self) -> &Arc<CoinView> {
        &self.coins
    }

    /// Signal observed by the pipeline and the driver loop.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Connect a validated header to the header chain.
    pub fn submit_header(&self, header: &BlockHeader) -> Result<ChainedPosition, StrandError> {
        Ok(self.chain.connect(header)?)
    }

    /// Hand a downloaded block to the pipeline. Returns `false` if the
    /// download queue is full.
    pub fn submit_block(&self, block: Block) -> bool {
        self.queue.push(block)
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.pipeline.lock().stats()
    }

    /// One driver round: run the pipeline, prune the download queue, then
    /// catch the coinview up.
    /// Blocks the calling thread.
    pub fn sync_once(&self) -> Result<(SyncOutcome, CatchUpReport), StrandError> {
        self.round().run(self.config.coin_catch_up_limit)
    }

    /// Drive synchronization until shutdown is requested.
    ///
    /// Returns the first fatal error unchanged.
    pub async fn run(&self) -> Result<(), StrandError> {
        info!("sync driver started");
        while !self.shutdown.is_triggered() {
            let round = self.round();
            let limit = self.config.coin_catch_up_limit;
            let (outcome, report) =
                tokio::task::spawn_blocking(move || round.run(limit))
                    .await
                    .map_err(|e| StrandError::Task(e.to_string()))??;

            let stats = self.sync_stats();
            debug!(
                ?outcome,
                applied = report.applied,
                blocks = self.blocks.tip().height,
                coins = self.coins.tip().height,
                stored = stats.blocks_stored,
                reorgs = stats.reorgs,
                stalls = stats.stalls,
                "driver round finished"
            );

            match outcome {
                SyncOutcome::Progress(_) => continue,
                // The coinview may still trail the archive.
                SyncOutcome::Backoff(_) if report.applied > 0 => continue,
                SyncOutcome::Backoff(reason) => {
                    debug!(?reason, "backing off");
                    self.idle(self.config.idle_backoff).await;
                }
            }
        }
        self.blocks.flush()?;
        self.coins.flush()?;
        info!(
            blocks = self.blocks.tip().height,
            coins = self.coins.tip().height,
            "sync driver stopped"
        );
        Ok(())
    }

    /// Feed headers and blocks in chain order, waiting while the download
    /// queue is full. Returns how many blocks were handed over.
    pub async fn import(&self, blocks: Vec<Block>) -> Result<usize, StrandError> {
        let mut imported = 0;
        for block in blocks {
            self.chain.connect(&block.header)?;
            while !self.queue.push(block.clone()) {
                if self.shutdown.is_triggered() {
                    return Ok(imported);
                }
                tokio::time::sleep(self.config.idle_backoff).await;
            }
            imported += 1;
        }
        info!(imported, height = self.chain.height(), "import finished");
        Ok(imported)
    }

    fn round(&self) -> Round {
        Round {
            pipeline: Arc::clone(&self.pipeline),
            updater: Arc::clone(&self.updater),
            queue: Arc::clone(&self.queue),
            chain: Arc::clone(&self.chain),
            blocks: Arc::clone(&self.blocks),
        }
    }

    async fn idle(&self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while !self.shutdown.is_triggered() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL.min(deadline - now)).await;
        }
    }
}

/// Everything one blocking driver round touches.
struct Round {
    pipeline: Arc<Mutex<SyncPipeline>>,
    updater: Arc<CoinUpdater>,
    queue: Arc<DownloadQueue>,
    chain: Arc<HeaderChain>,
    blocks: Arc<BlockStore>,
}

impl Round {
    /// Run the pipeline, evict queued blocks it will never ask for, then
    /// catch the coinview up.
    fn run(&self, limit: u64) -> Result<(SyncOutcome, CatchUpReport), StrandError> {
        let outcome = self.pipeline.lock().run_once()?;
        self.prune_queue()?;
        let report = self.updater.catch_up(limit)?;
        Ok((outcome, report))
    }

    /// Drop queued blocks that are already archived or whose header is on a
    /// stale fork. Blocks with unknown headers are kept.
    fn prune_queue(&self) -> Result<usize, StrandError> {
        let mut failed = None;
        let evicted = self.queue.prune(|hash| {
            if self.chain.get(hash).is_some() && !self.chain.contains(hash) {
                return false;
            }
            match self.blocks.exists(hash) {
                Ok(stored) => !stored,
                Err(e) => {
                    failed.get_or_insert(e);
                    true
                }
            }
        });
        match failed {
            Some(e) => Err(e.into()),
            None => Ok(evicted),
        }
    }
}

/// Read a bincode-encoded `Vec<Block>` from `path`.
pub fn load_blocks(path: &Path) -> Result<Vec<Block>, StrandError> {
    let bytes = std::fs::read(path)?;
    let (blocks, _): (Vec<Block>, usize) =
        bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| StrandError::Config(format!("{}: {e}", path.display())))?;
    if blocks.is_empty() {
        warn!(path = %path.display(), "import file holds no blocks");
    }
    Ok(blocks)
}

/// Write blocks in the format [`load_blocks`] reads.
pub fn save_blocks(path: &Path, blocks: &[Block]) -> Result<(), StrandError> {
    let bytes = bincode::encode_to_vec(blocks, bincode::config::standard())
        .map_err(|e| StrandError::Config(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}
