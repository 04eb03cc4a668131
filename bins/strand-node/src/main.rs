//! Strand full node binary.
//!
//! Opens the block archive and coinview, then keeps them synchronized with
//! the header chain until Ctrl+C. Blocks can be fed from a file with
//! `--import`.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use strand_node_lib::{Node, NodeConfig, load_blocks};
use tracing::{error, info};

/// Strand full node.
#[derive(Parser, Debug)]
#[command(
    name = "strand-node",
    version,
    about = "Strand full node with rewindable block and coin storage"
)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the block archive and coinview
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Undo records kept per store (0 keeps all)
    #[arg(long)]
    max_reorg_depth: Option<u64>,

    /// Bincode file of blocks to import in chain order
    #[arg(long)]
    import: Option<PathBuf>,
}

impl Args {
    /// Load the layered configuration and apply CLI overrides.
    fn into_config(self) -> anyhow::Result<(NodeConfig, Option<PathBuf>)> {
        let mut config = NodeConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(depth) = self.max_reorg_depth {
            config.store.max_reorg_depth = depth;
        }
        Ok((config, self.import))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, import) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(2);
        }
    };

    init_logging(&config.log_level, &config.log_format);

    if let Err(e) = run(config, import).await {
        error!("fatal: {e:#}");
        process::exit(1);
    }
}

async fn run(config: NodeConfig, import: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Strand Full Node v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = %config.data_dir.display(), "starting");
    info!(
        max_reorg_depth = config.store.max_reorg_depth,
        batch_max_bytes = config.sync.batch_max_bytes,
        stall_threshold = config.sync.stall_threshold,
        "storage and sync settings"
    );

    let node = Arc::new(Node::open(config).context("failed to open node")?);
    let shutdown = node.shutdown_signal();

    let runner = {
        let node = Arc::clone(&node);
        tokio::spawn(async move { node.run().await })
    };

    if let Some(path) = import {
        let blocks = load_blocks(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = node.import(blocks).await {
                error!("import failed: {e}");
            }
        });
    }

    info!("Strand node running (Ctrl+C to stop)");

    let mut runner = runner;
    tokio::select! {
        result = &mut runner => {
            info!("sync driver exited");
            return result.context("sync driver panicked")?.map_err(Into::into);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install Ctrl+C handler")?;
            info!("received Ctrl+C, shutting down...");
            shutdown.trigger();
        }
    }

    // Let the in-flight round finish its commit before exiting.
    runner.await.context("sync driver panicked")??;
    info!("Strand node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured JSON output; any other value selects human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "strand-node",
            "--data-dir",
            "/tmp/strand-cli",
            "--log-format",
            "json",
            "--max-reorg-depth",
            "7",
        ]);
        let (config, import) = args.into_config().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/strand-cli"));
        assert_eq!(config.log_format, "json");
        assert_eq!(config.store.max_reorg_depth, 7);
        assert!(import.is_none());
    }

    #[test]
    fn defaults_when_no_flags() {
        let (config, _) = Args::parse_from(["strand-node"]).into_config().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "text");
    }
}
