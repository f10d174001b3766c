//! Error types for the collector core
//!
//! Two families matter to callers: transient errors (retry and move on)
//! and fatal consistency violations (halt the pipeline before replicated
//! data is silently corrupted). [`CollectorError::is_fatal`] draws the
//! line; the enclosing supervisor decides how to surface a fatal error
//! (log-and-exit, restart, ...), the core never terminates the process
//! itself.

use crate::oplog::Timestamp;
use thiserror::Error;

/// Result alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Source connectivity (connect failure, dropped stream)
    Network,
    /// Consumer waited out its pull bound
    Timeout,
    /// Replication consistency violation (move-chunk, DDL ordering)
    Consistency,
    /// Internal programming-contract breach
    Contract,
    /// Encoding/decoding of record payloads
    Serialization,
}

/// Collector-specific errors.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Source connection could not be established or was lost.
    #[error("source connection error: {0}")]
    Connection(String),

    /// No buffered record arrived within the configured pull bound.
    /// Distinct from an error: the caller simply retries.
    #[error("no event within the configured pull timeout")]
    PullTimeout,

    /// An input queue's producer side has been dropped.
    #[error("logs queue {queue} closed by producer")]
    QueueClosed { queue: usize },

    /// A queue read returned a zero-length slice, which the producer
    /// contract forbids.
    #[error("logs queue {queue} yielded a zero-length batch")]
    EmptyQueueBatch { queue: usize },

    /// A chunk-migration record was observed mid-replication. Ordering
    /// and sharding guarantees cannot be upheld past this point.
    #[error("move chunk oplog found in {namespace} at ts {timestamp}")]
    MoveChunk {
        namespace: String,
        timestamp: Timestamp,
    },

    /// A DDL record's timestamp is at or below the full-sync baseline,
    /// an impossible causal order between baseline and incremental sync.
    #[error(
        "ddl oplog in {namespace} at ts {timestamp} precedes full sync finish position {full_sync_finish_position}"
    )]
    DdlBeforeBaseline {
        namespace: String,
        timestamp: Timestamp,
        full_sync_finish_position: Timestamp,
    },

    /// Same-timestamp fragments could not be combined into one composite
    /// record. Malformed transaction framing is not retryable.
    #[error("transaction gather failed: {0}")]
    TransactionGather(String),

    /// Record payload could not be encoded/decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CollectorError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transaction-gather error.
    pub fn gather(msg: impl Into<String>) -> Self {
        Self::TransactionGather(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Category of this error, for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Network,
            Self::PullTimeout => ErrorCategory::Timeout,
            Self::QueueClosed { .. } | Self::EmptyQueueBatch { .. } => ErrorCategory::Contract,
            Self::MoveChunk { .. } | Self::DdlBeforeBaseline { .. } => ErrorCategory::Consistency,
            Self::TransactionGather(_) => ErrorCategory::Consistency,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    /// Whether processing must halt. Continuing past a fatal error could
    /// silently corrupt replicated data.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MoveChunk { .. }
                | Self::DdlBeforeBaseline { .. }
                | Self::TransactionGather(_)
                | Self::EmptyQueueBatch { .. }
        )
    }

    /// Whether the caller may retry the operation that produced this.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::PullTimeout)
    }
}
