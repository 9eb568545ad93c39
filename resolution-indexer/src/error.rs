// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::ChainError;

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    // A single event could not be applied. Logged and skipped, the batch continues.
    #[error("Event processing failed: {0}")]
    EventProcessing(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Reorg at block {block} is deeper than the {max_reorg_size} block window, manual resync required")]
    ReorgTooDeep { block: u64, max_reorg_size: u64 },

    #[error("Worker status row for {0} is locked by another worker")]
    WorkerLocked(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

impl IndexerError {
    /// Errors that only invalidate one event. Everything else aborts the iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IndexerError::EventProcessing(_))
    }

    /// Short label used for the `errors` metric.
    pub fn error_type(&self) -> &'static str {
        match self {
            IndexerError::EventProcessing(_) => "event_processing",
            IndexerError::InvariantViolation(_) => "invariant_violation",
            IndexerError::ReorgTooDeep { .. } => "reorg_too_deep",
            IndexerError::WorkerLocked(_) => "worker_locked",
            IndexerError::Storage(_) => "storage",
            IndexerError::Chain(_) => "chain",
            IndexerError::Config(_) => "config",
        }
    }
}

impl From<diesel::result::Error> for IndexerError {
    fn from(e: diesel::result::Error) -> Self {
        IndexerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Storage(format!("JSON column could not be converted: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_event_errors_are_recoverable() {
        assert!(IndexerError::EventProcessing("x".into()).is_recoverable());
        assert!(!IndexerError::InvariantViolation("x".into()).is_recoverable());
        assert!(!IndexerError::Storage("x".into()).is_recoverable());
        assert!(!IndexerError::WorkerLocked("ETH".into()).is_recoverable());
        assert!(!IndexerError::ReorgTooDeep {
            block: 10,
            max_reorg_size: 5
        }
        .is_recoverable());
        assert!(!IndexerError::Chain(ChainError::BlockNotFound(1)).is_recoverable());
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(
            IndexerError::WorkerLocked("ZIL".into()).error_type(),
            "worker_locked"
        );
        assert_eq!(
            IndexerError::Chain(ChainError::Rpc("timeout".into())).error_type(),
            "chain"
        );
    }
}
