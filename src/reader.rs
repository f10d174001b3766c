//! Change-stream event reader
//!
//! [`EventReader`] owns one source connection and one background fetch
//! task. The task keeps the connection alive (reopening it from the
//! current resumable position after any loss), continuously drains the
//! stream into a bounded buffer, and treats "caught up" as a transient
//! condition: close, back off one interval, reconnect.
//!
//! The consumer side is a single timeout-bounded pull
//! ([`EventReader::next`]); a full buffer backpressures the fetch loop
//! without any explicit flow-control protocol.

use crate::config::ReaderConfig;
use crate::error::{CollectorError, Result};
use crate::metrics::CollectorMetrics;
use crate::oplog::Timestamp;
use crate::traits::{ChangeStream, ChangeStreamConnector};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Resumable-position value meaning "unset, defer to the caller-supplied
/// default".
pub const POSITION_UNSET: Timestamp = -1;

/// Reads raw change-stream events from one source into a bounded buffer.
pub struct EventReader {
    /// Source address the connector dials.
    src: String,
    /// Source replica-set / shard name, for log context.
    replset: String,
    config: ReaderConfig,
    connector: Arc<dyn ChangeStreamConnector>,
    metrics: Arc<CollectorMetrics>,

    /// Logical-time cursor the next (re)connect resumes from.
    position: Arc<AtomicI64>,
    /// Guards single fetcher creation.
    fetcher_started: Arc<AtomicBool>,

    event_tx: mpsc::Sender<Result<Bytes>>,
    event_rx: mpsc::Receiver<Result<Bytes>>,
}

impl EventReader {
    /// Create a reader for `src`. No I/O happens until
    /// [`start_fetcher`](Self::start_fetcher).
    pub fn new(
        src: impl Into<String>,
        replset: impl Into<String>,
        config: ReaderConfig,
        connector: Arc<dyn ChangeStreamConnector>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        Self {
            src: src.into(),
            replset: replset.into(),
            config,
            connector,
            metrics: Arc::new(CollectorMetrics::new()),
            position: Arc::new(AtomicI64::new(POSITION_UNSET)),
            fetcher_started: Arc::new(AtomicBool::new(false)),
            event_tx,
            event_rx,
        }
    }

    /// Share a metrics instance instead of the reader's own.
    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the resume cursor only if it is currently unset. Used to
    /// adopt a caller-provided default exactly once.
    pub fn set_query_timestamp_on_empty(&self, ts: Timestamp) {
        let _ = self.position.compare_exchange(
            POSITION_UNSET,
            ts,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Unconditionally overwrite the resume cursor, e.g. once a baseline
    /// snapshot completes and an authoritative resume point is known.
    pub fn update_query_timestamp(&self, ts: Timestamp) {
        self.position.store(ts, Ordering::SeqCst);
    }

    /// Current resume cursor ([`POSITION_UNSET`] if never set).
    pub fn query_timestamp(&self) -> Timestamp {
        self.position.load(Ordering::SeqCst)
    }

    /// Start the background fetch task. Idempotent: only the first call
    /// spawns a task, later calls are no-ops.
    pub fn start_fetcher(&self) {
        if self
            .fetcher_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!(src = %self.src, replset = %self.replset, "starting change stream fetcher");
        tokio::spawn(run_fetch_loop(FetchLoop {
            src: self.src.clone(),
            replset: self.replset.clone(),
            connector: Arc::clone(&self.connector),
            position: Arc::clone(&self.position),
            metrics: Arc::clone(&self.metrics),
            tx: self.event_tx.clone(),
            backoff: self.config.retry_backoff,
        }));
    }

    /// Pull the next raw event, waiting at most the configured timeout.
    ///
    /// [`CollectorError::PullTimeout`] means "no data right now", which
    /// callers treat differently from a stream error.
    pub async fn next(&mut self) -> Result<Bytes> {
        match timeout(self.config.pull_timeout, self.event_rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(CollectorError::connection("fetcher channel closed")),
            Err(_) => {
                self.metrics.add_reader_timeout();
                Err(CollectorError::PullTimeout)
            }
        }
    }
}

struct FetchLoop {
    src: String,
    replset: String,
    connector: Arc<dyn ChangeStreamConnector>,
    position: Arc<AtomicI64>,
    metrics: Arc<CollectorMetrics>,
    tx: mpsc::Sender<Result<Bytes>>,
    backoff: std::time::Duration,
}

/// Runs until the consumer drops its receiver; process shutdown is an
/// external-lifecycle concern.
async fn run_fetch_loop(ctx: FetchLoop) {
    let mut conn: Option<Box<dyn ChangeStream>> = None;

    loop {
        if conn.as_ref().map_or(true, |c| !c.is_live()) {
            if let Some(mut stale) = conn.take() {
                stale.close().await;
            }
            let resume = ctx.position.load(Ordering::SeqCst);
            match ctx.connector.connect(&ctx.src, resume).await {
                Ok(fresh) => conn = Some(fresh),
                Err(e) => {
                    error!(
                        replset = %ctx.replset,
                        resume,
                        error = %e,
                        "change stream connect failed"
                    );
                    ctx.metrics.add_reader_error();
                    if ctx.tx.send(Err(e)).await.is_err() {
                        return;
                    }
                    sleep(ctx.backoff).await;
                    continue;
                }
            }
        }
        let Some(stream) = conn.as_mut() else {
            continue;
        };

        match stream.next_event().await {
            Ok(Some(payload)) => {
                ctx.metrics.add_reader_event();
                if ctx.tx.send(Ok(payload)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                // Caught up: transient, not an error.
                warn!(replset = %ctx.replset, "change stream hit the end");
                if let Some(mut caught_up) = conn.take() {
                    caught_up.close().await;
                }
                sleep(ctx.backoff).await;
            }
            Err(e) => {
                warn!(replset = %ctx.replset, error = %e, "change stream read failed");
                ctx.metrics.add_reader_error();
                if let Some(mut broken) = conn.take() {
                    broken.close().await;
                }
                if ctx.tx.send(Err(e)).await.is_err() {
                    return;
                }
            }
        }
    }
}
