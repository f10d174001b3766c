//! # opstream - CDC ingestion and batching core
//!
//! The collector half of a change-data-capture pipeline: tail a source
//! database's oplog/change stream and regroup individual change records
//! into ordered batches for parallel delivery to a fixed set of
//! downstream workers, preserving the ordering guarantees replication
//! needs (transactional atomicity, schema-change ordering, per-key
//! ordering).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  fetch loop   ┌──────────────┐   producers    ┌───────────┐
//! │   source   │──────────────▶│ EventReader  │───(external)──▶│ queue set │
//! │change strm │  reconnect    │bounded buffer│                └─────┬─────┘
//! └────────────┘  + backoff    └──────────────┘                      │
//!                                                                    ▼
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      Batcher                         │
//!                 │  filter → DDL barrier → transaction merge →          │
//!                 │  deterministic per-key fan-out                       │
//!                 └──────┬──────────────┬──────────────┬─────────────────┘
//!                        ▼              ▼              ▼
//!                   ┌────────┐     ┌────────┐     ┌────────┐
//!                   │worker 0│     │worker 1│ ... │worker N│
//!                   └────────┘     └────────┘     └────────┘
//! ```
//!
//! A round that produced a **barrier** (a gathered transaction or a DDL
//! record) must be fully acknowledged by every worker before the next
//! round starts; that is the only cross-worker ordering the pipeline
//! relies on.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # async fn example(
//! #     queues: Vec<tokio::sync::mpsc::Receiver<Vec<opstream::GenericOplog>>>,
//! #     workers: Vec<std::sync::Arc<dyn opstream::WorkerSink>>,
//! #     connector: std::sync::Arc<dyn opstream::ChangeStreamConnector>,
//! # ) -> anyhow::Result<()> {
//! use opstream::{
//!     Batcher, BatcherConfig, EventReader, FilterChain, NoopFilter, NoopHandler, ReaderConfig,
//! };
//! use std::sync::Arc;
//!
//! let reader = EventReader::new(
//!     "mongodb://source:27017",
//!     "shard-0",
//!     ReaderConfig::default(),
//!     connector,
//! );
//! reader.start_fetcher();
//!
//! let mut batcher = Batcher::new(
//!     BatcherConfig::default(),
//!     queues,
//!     FilterChain::new().with(NoopFilter),
//!     Arc::new(NoopHandler),
//!     workers,
//! );
//!
//! loop {
//!     let result = batcher.batch_more().await?;
//!     let barrier = result.barrier;
//!     batcher.dispatch(result.group).await;
//!     if barrier {
//!         // wait for every worker to acknowledge before continuing
//!     }
//! }
//! # }
//! ```

pub mod batcher;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod oplog;
pub mod partition;
pub mod reader;
pub mod traits;
pub mod transaction;

// Core types: the batching/reading surface most callers need.
pub use batcher::{BatchGroup, BatchResult, Batcher};
pub use config::{BatcherConfig, BatcherConfigBuilder, ReaderConfig, ReaderConfigBuilder};
pub use error::{CollectorError, ErrorCategory, Result};
pub use oplog::{compose_ts, ts_seconds, GenericOplog, ParsedLog, Timestamp};
pub use reader::{EventReader, POSITION_UNSET};

// Collaborator contracts implemented by the surrounding pipeline.
pub use traits::{ChangeStream, ChangeStreamConnector, NoopHandler, OplogHandler, WorkerSink};

// Filtering, partitioning and transaction assembly.
pub use filter::{DdlFilter, FilterChain, GidFilter, MigrateFilter, NoopFilter, OplogFilter};
pub use metrics::{CollectorMetrics, MetricsSnapshot};
pub use partition::{HashStrategy, OplogHasher};
pub use transaction::gather_apply_ops;
