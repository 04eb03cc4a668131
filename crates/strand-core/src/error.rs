//! Error types for the Strand node.
use thiserror::Error;

use crate::types::Hash256;

/// Errors raised by the rewindable stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("tip mismatch: caller expected {expected}, store is at {actual}")]
    TipMismatch { expected: Hash256, actual: Hash256 },
    #[error("rewind ledger is empty: store is at genesis")]
    EmptyLedger,
    #[error("rewind horizon exceeded: only {max_depth} undo records are retained")]
    RewindHorizonExceeded { max_depth: u64 },
    #[error("corrupt record in {namespace}: {reason}")]
    Corruption { namespace: String, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("storage backend: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the store can no longer be trusted after this error.
    ///
    /// Only a tip mismatch is recoverable: the caller re-reads the tip and
    /// recomputes its deltas.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TipMismatch { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("unknown parent {0}")]
    UnknownParent(Hash256),
    #[error("unknown header {0}")]
    UnknownHeader(Hash256),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no common ancestor with the best chain below {0}")]
    NoCommonAncestor(Hash256),
    #[error("stored block missing during reorg walk: {0}")]
    MissingStoredBlock(Hash256),
    #[error("position not on any known chain: {0}")]
    UnknownPosition(Hash256),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("missing coin {txid}:{index}")]
    MissingCoin { txid: Hash256, index: u32 },
    #[error("block {0} not found in archive")]
    MissingBlock(Hash256),
}

/// Top-level error returned by the node.
#[derive(Error, Debug)]
pub enum StrandError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Coin(#[from] CoinError),
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

impl StrandError {
    /// The store error at the root of this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) | Self::Sync(SyncError::Store(e)) | Self::Coin(CoinError::Store(e)) => {
                Some(e)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_tip_mismatch_is_recoverable() {
        let mismatch = StoreError::TipMismatch {
            expected: Hash256([1; 32]),
            actual: Hash256([2; 32]),
        };
        assert!(!mismatch.is_fatal());
        assert!(StoreError::EmptyLedger.is_fatal());
        assert!(StoreError::InvalidArgument("empty batch".into()).is_fatal());
        assert!(StoreError::RewindHorizonExceeded { max_depth: 10 }.is_fatal());
        assert!(
            StoreError::Corruption {
                namespace: "coins".into(),
                reason: "bad".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn sync_error_preserves_store_error() {
        let err: SyncError = StoreError::EmptyLedger.into();
        assert_eq!(err.to_string(), StoreError::EmptyLedger.to_string());
        assert!(matches!(err, SyncError::Store(StoreError::EmptyLedger)));
    }

    #[test]
    fn strand_error_exposes_root_store_error() {
        let err: StrandError = SyncError::from(StoreError::RewindHorizonExceeded { max_depth: 3 }).into();
        assert_eq!(
            err.store_error(),
            Some(&StoreError::RewindHorizonExceeded { max_depth: 3 })
        );
        assert_eq!(err.to_string(), "rewind horizon exceeded: only 3 undo records are retained");
        assert!(StrandError::Config("x".into()).store_error().is_none());
    }
}
