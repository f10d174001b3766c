//! Collaborator contracts
//!
//! The collector core owns no wire protocol and no delivery transport;
//! these traits are what it requires from its surroundings. Producers of
//! the queue set, the worker/tunnel layer, the checkpoint recorder and
//! the source driver all implement one of them.

use crate::error::Result;
use crate::oplog::{GenericOplog, ParsedLog, Timestamp};
use async_trait::async_trait;
use bytes::Bytes;

/// Per-record side-effect hook (checkpoint/metrics), invoked exactly once
/// for every record that reaches a worker batch, before partitioning.
/// Must not fail the round.
pub trait OplogHandler: Send + Sync {
    fn handle(&self, log: &ParsedLog);
}

/// Handler that does nothing. Useful when no checkpoint recorder is
/// attached yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl OplogHandler for NoopHandler {
    fn handle(&self, _log: &ParsedLog) {}
}

/// One downstream delivery sink. The batcher offers every worker a batch
/// each round, empty or not, so all worker streams stay in lockstep for
/// barrier coordination.
#[async_trait]
pub trait WorkerSink: Send + Sync {
    /// Mark the worker's acknowledgement state. The batcher sets `false`
    /// whenever it hands the worker a non-empty batch.
    fn set_all_acked(&self, acked: bool);

    /// Hand a batch (possibly empty) to the worker for delivery.
    async fn offer(&self, batch: Vec<GenericOplog>);
}

/// Live handle onto a source change stream.
#[async_trait]
pub trait ChangeStream: Send {
    /// Pull the next record. `Ok(None)` means the stream is caught up
    /// (no further data currently available), which is not an error.
    async fn next_event(&mut self) -> Result<Option<Bytes>>;

    /// Whether the underlying connection is still usable.
    fn is_live(&self) -> bool;

    /// Release the connection.
    async fn close(&mut self);
}

/// Opens change-stream connections, resuming from a logical position.
#[async_trait]
pub trait ChangeStreamConnector: Send + Sync {
    /// Open a stream against `src`, resuming from `resume_position`
    /// (`-1` lets the source pick its default starting point).
    async fn connect(&self, src: &str, resume_position: Timestamp)
        -> Result<Box<dyn ChangeStream>>;
}
