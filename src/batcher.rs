//! Oplog batching
//!
//! The [`Batcher`] pulls ordered record slices from a set of input
//! queues, filters them, merges same-timestamp transaction fragments,
//! detects schema changes, and fans records out to per-worker batches.
//!
//! ## Barriers
//!
//! A round that returns `barrier = true` produced output that must be
//! fully delivered and acknowledged by every worker before
//! [`Batcher::batch_more`] is called again. Barriers serialize schema
//! changes and gathered transactions against the rest of the stream;
//! everything the round could not consume waits in the remain buffer and
//! is re-read first on the next round.
//!
//! ## Ordering
//!
//! Records inside one queue are causally ordered by the producer and
//! keep that order end to end. Interleaving across queues is round-robin
//! with an opportunistic non-blocking drain and carries no ordering
//! meaning; downstream correctness rests on the barrier protocol and on
//! deterministic per-key worker assignment.

use crate::config::BatcherConfig;
use crate::error::{CollectorError, Result};
use crate::filter::{DdlFilter, FilterChain, MigrateFilter};
use crate::metrics::CollectorMetrics;
use crate::oplog::{GenericOplog, ParsedLog};
use crate::partition::OplogHasher;
use crate::traits::{OplogHandler, WorkerSink};
use crate::transaction;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-worker batches for one round; entry *i* is worker *i*'s ordered
/// slice.
pub type BatchGroup = Vec<Vec<GenericOplog>>;

/// Outcome of one [`Batcher::batch_more`] round.
#[derive(Debug)]
pub struct BatchResult {
    /// Per-worker batches. A record appears in exactly one worker's
    /// slice, in its input order.
    pub group: BatchGroup,
    /// Whether the caller must wait for full acknowledgement of this
    /// round before batching again.
    pub barrier: bool,
    /// Whether every worker's slice is empty (everything was filtered).
    pub all_empty: bool,
}

/// Batches oplog records for parallel delivery while preserving
/// transactional atomicity, DDL ordering and per-key ordering.
///
/// Single logical consumer: `batch_more` takes `&mut self` and must not
/// be invoked concurrently.
pub struct Batcher {
    config: BatcherConfig,

    /// Consumer ends of the per-source ordered queues.
    queues: Vec<mpsc::Receiver<Vec<GenericOplog>>>,
    /// Round-robin cursor into `queues`.
    next_queue: usize,

    filter_chain: FilterChain,
    ddl_filter: DdlFilter,
    move_chunk_filter: MigrateFilter,
    handler: Arc<dyn OplogHandler>,
    hasher: OplogHasher,
    workers: Vec<Arc<dyn WorkerSink>>,
    metrics: Arc<CollectorMetrics>,

    /// Most recently dispatched record (checkpoint).
    last_oplog: Option<GenericOplog>,
    /// Most recently filtered-out record (checkpoint).
    last_filter_oplog: Option<ParsedLog>,
    /// Record read but not yet placed; becomes a transaction fragment if
    /// the next record shares its timestamp.
    previous: Option<GenericOplog>,
    /// Records a barrier split off an earlier read; drained verbatim
    /// before any new queue read.
    remain_logs: Vec<GenericOplog>,
}

impl Batcher {
    /// Create a batcher over `queues`, fanning out to `workers`.
    ///
    /// # Panics
    ///
    /// Panics if `queues` or `workers` is empty; a batcher without
    /// inputs or outputs is a wiring bug.
    pub fn new(
        config: BatcherConfig,
        queues: Vec<mpsc::Receiver<Vec<GenericOplog>>>,
        filter_chain: FilterChain,
        handler: Arc<dyn OplogHandler>,
        workers: Vec<Arc<dyn WorkerSink>>,
    ) -> Self {
        assert!(!queues.is_empty(), "batcher needs at least one logs queue");
        assert!(!workers.is_empty(), "batcher needs at least one worker");
        Self {
            config,
            queues,
            next_queue: 0,
            filter_chain,
            ddl_filter: DdlFilter::new(),
            move_chunk_filter: MigrateFilter::new(),
            handler,
            hasher: OplogHasher::default(),
            workers,
            metrics: Arc::new(CollectorMetrics::new()),
            last_oplog: None,
            last_filter_oplog: None,
            previous: None,
            remain_logs: Vec::new(),
        }
    }

    /// Replace the worker-assignment hasher.
    pub fn with_hasher(mut self, hasher: OplogHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replace the DDL detector.
    pub fn with_ddl_filter(mut self, filter: DdlFilter) -> Self {
        self.ddl_filter = filter;
        self
    }

    /// Replace the chunk-migration detector.
    pub fn with_move_chunk_filter(mut self, filter: MigrateFilter) -> Self {
        self.move_chunk_filter = filter;
        self
    }

    /// Share a metrics instance instead of the batcher's own.
    pub fn with_metrics(mut self, metrics: Arc<CollectorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics handle for this batcher.
    pub fn metrics(&self) -> Arc<CollectorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Checkpoint pair: the last dispatched record and the last
    /// filtered-out record. Lets the sync coordinator compute a safe
    /// resume position even when a round dispatched nothing.
    pub fn last_oplog(&self) -> (Option<&ParsedLog>, Option<&ParsedLog>) {
        (
            self.last_oplog.as_ref().map(|log| &log.parsed),
            self.last_filter_oplog.as_ref(),
        )
    }

    /// Batch the next stretch of records into per-worker slices.
    ///
    /// Runs the filter / DDL / transaction-merge state machine over
    /// successive merged reads until the round ends naturally or a
    /// barrier condition stops it. Fatal consistency violations surface
    /// as errors ([`CollectorError::is_fatal`]); the pipeline must halt
    /// on them.
    pub async fn batch_more(&mut self) -> Result<BatchResult> {
        let mut group: BatchGroup = vec![Vec::new(); self.workers.len()];
        let mut transaction_logs: Vec<ParsedLog> = Vec::new();
        let mut barrier = false;

        'outer: loop {
            let merge_batch = self.get_batch().await?;
            for (i, generic_log) in merge_batch.iter().enumerate() {
                // Records filtered inside a pending transaction cannot be
                // handled; the flush below gathers what was buffered.
                if self.filter(&generic_log.parsed)? {
                    self.last_filter_oplog = Some(generic_log.parsed.clone());
                    if self.flush_buffered(&mut group, &mut transaction_logs)? {
                        barrier = true;
                        self.remain_logs = merge_batch[i + 1..].to_vec();
                        break 'outer;
                    }
                    self.previous = None;
                    continue;
                }

                if self.ddl_filter.matches(&generic_log.parsed) {
                    if self.config.incr_sync_ddl {
                        let prev = self.previous.take();
                        self.add_into_batch_group(&mut group, prev);
                        if i == 0 {
                            // First record of the merged batch: the DDL
                            // goes out now, barrier lands after it.
                            self.add_into_batch_group(&mut group, Some(generic_log.clone()));
                            self.remain_logs = merge_batch[i + 1..].to_vec();
                        } else {
                            // Defer the DDL so it re-enters as the first
                            // record of the next round.
                            self.remain_logs = merge_batch[i..].to_vec();
                        }
                        self.previous = None;
                        barrier = true;
                        break 'outer;
                    }
                    // DDL replication disabled: same handling as a
                    // filtered record.
                    self.last_filter_oplog = Some(generic_log.parsed.clone());
                    if self.flush_buffered(&mut group, &mut transaction_logs)? {
                        barrier = true;
                        self.remain_logs = merge_batch[i + 1..].to_vec();
                        break 'outer;
                    }
                    self.previous = None;
                    continue;
                }

                let prev_ts = self.previous.as_ref().map(|p| p.parsed.timestamp);
                if prev_ts == Some(generic_log.parsed.timestamp) {
                    // Transaction fragment: buffer the previous record;
                    // the current one becomes the new previous below.
                    if let Some(prev) = &self.previous {
                        transaction_logs.push(prev.parsed.clone());
                    }
                } else if !transaction_logs.is_empty() {
                    // Timestamp changed: the transaction just ended.
                    if let Some(prev) = self.previous.take() {
                        transaction_logs.push(prev.parsed);
                    }
                    let gathered = self.gather_transaction(&transaction_logs)?;
                    transaction_logs.clear();
                    self.add_into_batch_group(&mut group, Some(gathered));
                    self.remain_logs = merge_batch[i..].to_vec();
                    self.previous = None;
                    barrier = true;
                    break 'outer;
                } else {
                    let prev = self.previous.take();
                    self.add_into_batch_group(&mut group, prev);
                }

                self.previous = Some(generic_log.clone());
            }

            // A transaction may span reads; only then fetch more data
            // before ending the round.
            if transaction_logs.is_empty() {
                break;
            }
        }

        let mut all_empty = true;
        for batch in &group {
            if let Some(tail) = batch.last() {
                all_empty = false;
                let newer = self
                    .last_oplog
                    .as_ref()
                    .map_or(true, |cur| tail.parsed.timestamp > cur.parsed.timestamp);
                if newer {
                    self.last_oplog = Some(tail.clone());
                }
            }
        }

        if barrier {
            self.metrics.add_barrier();
        }

        Ok(BatchResult {
            group,
            barrier,
            all_empty,
        })
    }

    /// Hand a round's batches to the workers. Every worker is offered
    /// its batch even when empty so all streams stay in lockstep;
    /// returns whether any worker received records.
    pub async fn dispatch(&self, group: BatchGroup) -> bool {
        let mut work = false;
        for (worker, batch) in self.workers.iter().zip(group) {
            if !batch.is_empty() {
                work = true;
                worker.set_all_acked(false);
            }
            worker.offer(batch).await;
        }
        work
    }

    /// Next merged slice of records to process.
    ///
    /// Remain buffer first, verbatim. Otherwise one blocking read from
    /// the cursor queue, then non-blocking probes of subsequent queues
    /// (cursor keeps advancing) until `merge_batch_max` records are held
    /// or no queue has data ready. The blocking read bounds latency; the
    /// probes amortize per-round overhead under load.
    async fn get_batch(&mut self) -> Result<Vec<GenericOplog>> {
        if !self.remain_logs.is_empty() {
            return Ok(std::mem::take(&mut self.remain_logs));
        }

        let first = self.next_queue;
        let mut merge_batch = self.queues[first]
            .recv()
            .await
            .ok_or(CollectorError::QueueClosed { queue: first })?;
        self.move_to_next_queue();

        while merge_batch.len() < self.config.merge_batch_max {
            match self.queues[self.next_queue].try_recv() {
                Ok(more) => {
                    merge_batch.extend(more);
                    self.move_to_next_queue();
                }
                Err(_) => break,
            }
        }

        // Producer contract: queue slices are never empty.
        if merge_batch.is_empty() {
            return Err(CollectorError::EmptyQueueBatch { queue: first });
        }

        Ok(merge_batch)
    }

    /// Filter step. `Ok(true)` drops the record; fatal consistency
    /// violations (move-chunk, DDL before the full-sync baseline) come
    /// back as errors.
    fn filter(&self, log: &ParsedLog) -> Result<bool> {
        if let Some(name) = self.filter_chain.matched_by(log) {
            debug!(
                filter = name,
                ts = log.timestamp,
                ns = %log.namespace,
                "oplog filtered"
            );
            self.metrics.add_filtered(1);
            return Ok(true);
        }

        if self.move_chunk_filter.matches(log) {
            return Err(CollectorError::MoveChunk {
                namespace: log.namespace.clone(),
                timestamp: log.timestamp,
            });
        }

        // DDL below the baseline implies an impossible causal order
        // between full sync and incremental sync.
        if self.ddl_filter.matches(log) && log.timestamp <= self.config.full_sync_finish_position {
            return Err(CollectorError::DdlBeforeBaseline {
                namespace: log.namespace.clone(),
                timestamp: log.timestamp,
                full_sync_finish_position: self.config.full_sync_finish_position,
            });
        }

        Ok(false)
    }

    /// Place a record into its worker's slice: per-record handler first,
    /// then the deterministic worker assignment. `None` (no pending
    /// previous record) is a no-op, which is what keeps synthetic state
    /// out of worker batches.
    fn add_into_batch_group(&self, group: &mut BatchGroup, log: Option<GenericOplog>) {
        let Some(log) = log else { return };
        self.handler.handle(&log.parsed);
        let which = self.hasher.assign(&log.parsed, self.workers.len());
        group[which].push(log);
        self.metrics.add_dispatched(1);
    }

    fn gather_transaction(&self, fragments: &[ParsedLog]) -> Result<GenericOplog> {
        let gathered = transaction::gather_apply_ops(fragments)?;
        self.metrics.add_transaction();
        debug!(
            ts = gathered.parsed.timestamp,
            fragments = fragments.len(),
            "gathered transaction fragments into applyOps"
        );
        Ok(gathered)
    }

    /// Flush the pending previous record (and any buffered transaction
    /// fragments) into the batch group. `Ok(true)` means the flush
    /// produced a gathered transaction, which is itself a barrier.
    fn flush_buffered(
        &mut self,
        group: &mut BatchGroup,
        transaction_logs: &mut Vec<ParsedLog>,
    ) -> Result<bool> {
        let Some(prev) = self.previous.take() else {
            if !transaction_logs.is_empty() {
                return Err(CollectorError::gather(
                    "transaction fragments buffered without a previous record",
                ));
            }
            return Ok(false);
        };

        if !transaction_logs.is_empty() {
            transaction_logs.push(prev.parsed);
            let gathered = self.gather_transaction(transaction_logs)?;
            transaction_logs.clear();
            self.add_into_batch_group(group, Some(gathered));
            return Ok(true);
        }

        self.add_into_batch_group(group, Some(prev));
        Ok(false)
    }

    fn move_to_next_queue(&mut self) {
        self.next_queue = (self.next_queue + 1) % self.queues.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NoopFilter;
    use crate::oplog::compose_ts;
    use crate::traits::NoopHandler;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct RecordingSink {
        offered: Mutex<Vec<Vec<GenericOplog>>>,
        acked: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                offered: Mutex::new(Vec::new()),
                acked: Mutex::new(true),
            })
        }

        fn records(&self) -> Vec<GenericOplog> {
            self.offered
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .cloned()
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl WorkerSink for RecordingSink {
        fn set_all_acked(&self, acked: bool) {
            *self.acked.lock().unwrap() = acked;
        }

        async fn offer(&self, batch: Vec<GenericOplog>) {
            self.offered.lock().unwrap().push(batch);
        }
    }

    fn make_oplog(ts: i64, op: &str, id: &str) -> GenericOplog {
        GenericOplog::from_parsed(ParsedLog {
            timestamp: ts,
            operation: op.into(),
            gid: String::new(),
            namespace: "app.users".into(),
            object: json!({"_id": id}),
            query: Value::Null,
            from_migrate: false,
        })
        .unwrap()
    }

    fn make_ddl(ts: i64) -> GenericOplog {
        GenericOplog::from_parsed(ParsedLog {
            timestamp: ts,
            operation: "c".into(),
            gid: String::new(),
            namespace: "app.$cmd".into(),
            object: json!({"create": "users"}),
            query: Value::Null,
            from_migrate: false,
        })
        .unwrap()
    }

    struct Fixture {
        batcher: Batcher,
        senders: Vec<mpsc::Sender<Vec<GenericOplog>>>,
        sinks: Vec<Arc<RecordingSink>>,
    }

    fn fixture(queue_count: usize, worker_count: usize, config: BatcherConfig) -> Fixture {
        let mut senders = Vec::new();
        let mut queues = Vec::new();
        for _ in 0..queue_count {
            let (tx, rx) = mpsc::channel(16);
            senders.push(tx);
            queues.push(rx);
        }
        let sinks: Vec<Arc<RecordingSink>> =
            (0..worker_count).map(|_| RecordingSink::new()).collect();
        let workers: Vec<Arc<dyn WorkerSink>> = sinks
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn WorkerSink>)
            .collect();
        let batcher = Batcher::new(
            config,
            queues,
            FilterChain::new().with(NoopFilter),
            Arc::new(NoopHandler),
            workers,
        );
        Fixture {
            batcher,
            senders,
            sinks,
        }
    }

    #[tokio::test]
    async fn single_record_rounds_preserve_order() {
        let mut f = fixture(1, 1, BatcherConfig::default());
        let a = make_oplog(compose_ts(1, 0), "i", "a");
        let b = make_oplog(compose_ts(2, 0), "i", "a");
        f.senders[0].send(vec![a, b]).await.unwrap();

        let round1 = f.batcher.batch_more().await.unwrap();
        assert!(!round1.barrier);
        assert!(!round1.all_empty);
        // Last record of a read is carried as "previous"; only the
        // earlier one has been placed so far.
        assert_eq!(round1.group[0].len(), 1);
        assert_eq!(round1.group[0][0].parsed.timestamp, compose_ts(1, 0));

        // The carried record flushes once a later one arrives.
        f.senders[0]
            .send(vec![make_oplog(compose_ts(3, 0), "i", "z")])
            .await
            .unwrap();
        let round2 = f.batcher.batch_more().await.unwrap();
        assert_eq!(round2.group[0][0].parsed.timestamp, compose_ts(2, 0));
    }

    #[tokio::test]
    async fn checkpoint_tracks_max_dispatched_timestamp() {
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(compose_ts(1, 0), "i", "a"),
                make_oplog(compose_ts(2, 0), "i", "b"),
                make_oplog(compose_ts(3, 0), "i", "c"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(!result.all_empty);
        let (last, last_filtered) = f.batcher.last_oplog();
        // ts=3 record is still the pending previous; ts=2 is the newest
        // dispatched one.
        assert_eq!(last.unwrap().timestamp, compose_ts(2, 0));
        assert!(last_filtered.is_none());
    }

    #[tokio::test]
    async fn all_filtered_round_reports_empty_and_leaks_nothing() {
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(compose_ts(1, 0), "n", "a"),
                make_oplog(compose_ts(2, 0), "n", "b"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.all_empty);
        assert!(!result.barrier);
        assert!(result.group.iter().all(|b| b.is_empty()));

        let (last, last_filtered) = f.batcher.last_oplog();
        assert!(last.is_none());
        assert_eq!(last_filtered.unwrap().timestamp, compose_ts(2, 0));
        assert_eq!(f.batcher.metrics().snapshot().filtered, 2);
    }

    #[tokio::test]
    async fn transaction_fragments_gather_with_barrier() {
        let ts = compose_ts(10, 0);
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(ts, "i", "a"),
                make_oplog(ts, "i", "b"),
                make_oplog(ts, "i", "c"),
                make_oplog(ts + 1, "i", "d"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.barrier);

        let placed: Vec<_> = result.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1, "exactly one composite, no raw fragments");
        let composite = &placed[0].parsed;
        assert!(composite.is_apply_ops());
        assert_eq!(composite.timestamp, ts);
        assert_eq!(composite.object["applyOps"].as_array().unwrap().len(), 3);

        // D waits in the remain buffer for the next round.
        let next = f.batcher.batch_more().await.unwrap();
        assert!(!next.barrier);
        let pending: Vec<_> = next.group.iter().flatten().collect();
        assert!(pending.is_empty(), "d is carried as previous, not placed yet");
        f.senders[0]
            .send(vec![make_oplog(ts + 2, "i", "e")])
            .await
            .unwrap();
        let after = f.batcher.batch_more().await.unwrap();
        let placed: Vec<_> = after.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].parsed.object["_id"], "d");
    }

    #[tokio::test]
    async fn transaction_spans_multiple_reads() {
        let ts = compose_ts(10, 0);
        let mut f = fixture(1, 1, BatcherConfig::default());
        f.senders[0]
            .send(vec![make_oplog(ts, "i", "a"), make_oplog(ts, "i", "b")])
            .await
            .unwrap();
        f.senders[0]
            .send(vec![make_oplog(ts, "i", "c"), make_oplog(ts + 1, "i", "d")])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.barrier);
        let placed: Vec<_> = result.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(
            placed[0].parsed.object["applyOps"].as_array().unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn ddl_first_in_batch_goes_out_with_barrier() {
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_ddl(compose_ts(5, 0)),
                make_oplog(compose_ts(6, 0), "i", "a"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.barrier);
        let placed: Vec<_> = result.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert!(placed[0].parsed.is_command());

        // The data record was deferred: round 2 drains it from the remain
        // buffer into the previous-record slot, round 3 flushes it.
        let round2 = f.batcher.batch_more().await.unwrap();
        assert!(round2.group.iter().all(|b| b.is_empty()));

        f.senders[0]
            .send(vec![make_oplog(compose_ts(7, 0), "i", "b")])
            .await
            .unwrap();
        let round3 = f.batcher.batch_more().await.unwrap();
        let placed: Vec<_> = round3.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].parsed.object["_id"], "a");
    }

    #[tokio::test]
    async fn ddl_mid_batch_is_deferred_to_next_round() {
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(compose_ts(5, 0), "i", "a"),
                make_oplog(compose_ts(6, 0), "i", "b"),
                make_ddl(compose_ts(7, 0)),
                make_oplog(compose_ts(8, 0), "i", "c"),
            ])
            .await
            .unwrap();

        let round1 = f.batcher.batch_more().await.unwrap();
        assert!(round1.barrier);
        let placed: Vec<_> = round1.group.iter().flatten().collect();
        // a flushed on seeing b, b flushed as pending previous when the
        // DDL hit; the DDL itself re-enters next round.
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|l| l.parsed.is_data_op()));

        let round2 = f.batcher.batch_more().await.unwrap();
        assert!(round2.barrier);
        let placed: Vec<_> = round2.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert!(placed[0].parsed.is_command());
    }

    #[tokio::test]
    async fn ddl_disabled_is_treated_as_filtered() {
        let config = BatcherConfig::builder().incr_sync_ddl(false).build();
        let mut f = fixture(1, 2, config);
        f.senders[0]
            .send(vec![make_ddl(compose_ts(5, 0))])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.all_empty);
        assert!(!result.barrier);
        let (_, last_filtered) = f.batcher.last_oplog();
        assert!(last_filtered.unwrap().is_command());
    }

    #[tokio::test]
    async fn move_chunk_record_is_fatal() {
        let mut f = fixture(1, 1, BatcherConfig::default());
        let mut migrate = make_oplog(compose_ts(5, 0), "i", "a");
        migrate.parsed.from_migrate = true;
        f.senders[0].send(vec![migrate]).await.unwrap();

        let err = f.batcher.batch_more().await.unwrap_err();
        assert!(matches!(err, CollectorError::MoveChunk { .. }));
        assert!(err.is_fatal());
        assert!(f.sinks[0].records().is_empty());
    }

    #[tokio::test]
    async fn ddl_at_or_below_baseline_is_fatal() {
        let config = BatcherConfig::builder()
            .full_sync_finish_position(compose_ts(100, 0))
            .build();
        let mut f = fixture(1, 1, config);
        f.senders[0]
            .send(vec![make_ddl(compose_ts(99, 0))])
            .await
            .unwrap();

        let err = f.batcher.batch_more().await.unwrap_err();
        assert!(matches!(err, CollectorError::DdlBeforeBaseline { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn filtered_record_inside_transaction_flushes_with_barrier() {
        let ts = compose_ts(10, 0);
        let mut f = fixture(1, 1, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(ts, "i", "a"),
                make_oplog(ts, "i", "b"),
                make_oplog(ts + 1, "n", "x"),
                make_oplog(ts + 2, "i", "c"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.barrier);
        let placed: Vec<_> = result.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert!(placed[0].parsed.is_apply_ops());

        // c is in the remain buffer; the filtered no-op never re-enters.
        // Round 2 carries c as previous, round 3 flushes it.
        let round2 = f.batcher.batch_more().await.unwrap();
        assert!(round2.group.iter().all(|b| b.is_empty()));

        f.senders[0]
            .send(vec![make_oplog(ts + 3, "i", "d")])
            .await
            .unwrap();
        let round3 = f.batcher.batch_more().await.unwrap();
        let placed: Vec<_> = round3.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].parsed.object["_id"], "c");
    }

    #[tokio::test]
    async fn remain_buffer_drains_before_new_reads() {
        let ts = compose_ts(10, 0);
        let mut f = fixture(1, 1, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(ts, "i", "a"),
                make_oplog(ts, "i", "b"),
                make_oplog(ts + 1, "i", "d"),
                make_oplog(ts + 2, "i", "e"),
            ])
            .await
            .unwrap();

        let round1 = f.batcher.batch_more().await.unwrap();
        assert!(round1.barrier);

        // No new queue data needed: d and e come from the remain buffer.
        let round2 = f.batcher.batch_more().await.unwrap();
        assert!(!round2.barrier);
        let placed: Vec<_> = round2.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].parsed.object["_id"], "d");
    }

    #[tokio::test]
    async fn opportunistic_drain_merges_ready_queues() {
        let mut f = fixture(3, 1, BatcherConfig::default());
        f.senders[0]
            .send(vec![make_oplog(compose_ts(1, 0), "i", "a")])
            .await
            .unwrap();
        f.senders[1]
            .send(vec![make_oplog(compose_ts(2, 0), "i", "b")])
            .await
            .unwrap();
        f.senders[2]
            .send(vec![make_oplog(compose_ts(3, 0), "i", "c")])
            .await
            .unwrap();
        // Second slice on queue 0, picked up by the wrapped-around probe.
        f.senders[0]
            .send(vec![make_oplog(compose_ts(4, 0), "i", "z")])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        let placed: Vec<_> = result.group.iter().flatten().collect();
        // All four merged into one round; z stays carried as previous.
        assert_eq!(placed.len(), 3);
        let ids: Vec<_> = placed
            .iter()
            .map(|l| l.parsed.object["_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn merge_cap_stops_opportunistic_drain() {
        let config = BatcherConfig::builder().merge_batch_max(1).build();
        let mut f = fixture(2, 1, config);
        f.senders[0]
            .send(vec![make_oplog(compose_ts(1, 0), "i", "a")])
            .await
            .unwrap();
        f.senders[1]
            .send(vec![make_oplog(compose_ts(2, 0), "i", "b")])
            .await
            .unwrap();

        // Cap of one record: round 1 reads only queue 0's slice.
        let round1 = f.batcher.batch_more().await.unwrap();
        assert!(round1.group.iter().all(|b| b.is_empty()));

        // Round 2 reads queue 1 and flushes a.
        let round2 = f.batcher.batch_more().await.unwrap();
        let placed: Vec<_> = round2.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].parsed.object["_id"], "a");
    }

    #[tokio::test]
    async fn closed_queue_surfaces_as_error() {
        let mut f = fixture(1, 1, BatcherConfig::default());
        f.senders.clear();
        let err = f.batcher.batch_more().await.unwrap_err();
        assert!(matches!(err, CollectorError::QueueClosed { queue: 0 }));
    }

    #[tokio::test]
    async fn empty_queue_slice_violates_contract() {
        let mut f = fixture(1, 1, BatcherConfig::default());
        f.senders[0].send(Vec::new()).await.unwrap();
        let err = f.batcher.batch_more().await.unwrap_err();
        assert!(matches!(err, CollectorError::EmptyQueueBatch { queue: 0 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn dispatch_offers_every_worker_and_flags_work() {
        let f = fixture(1, 3, BatcherConfig::default());
        let mut group: BatchGroup = vec![Vec::new(); 3];
        group[1].push(make_oplog(compose_ts(1, 0), "i", "a"));

        let work = f.batcher.dispatch(group).await;
        assert!(work);
        for (i, sink) in f.sinks.iter().enumerate() {
            let offered = sink.offered.lock().unwrap();
            assert_eq!(offered.len(), 1, "worker {i} must be offered a batch");
        }
        assert!(!*f.sinks[1].acked.lock().unwrap());
        assert!(*f.sinks[0].acked.lock().unwrap());
    }

    #[tokio::test]
    async fn dispatch_of_all_empty_group_reports_no_work() {
        let f = fixture(1, 2, BatcherConfig::default());
        let work = f.batcher.dispatch(vec![Vec::new(), Vec::new()]).await;
        assert!(!work);
    }

    // Equal-timestamp grouping is purely timestamp-based: two unrelated
    // keys sharing a timestamp are gathered into one composite. Source
    // timestamps are unique per operation in the systems this collector
    // tails, so the case is theoretical, but the behavior is load-bearing
    // and pinned here.
    #[tokio::test]
    async fn merges_equal_timestamps_across_keys() {
        let ts = compose_ts(10, 0);
        let mut f = fixture(1, 2, BatcherConfig::default());
        f.senders[0]
            .send(vec![
                make_oplog(ts, "i", "a"),
                make_oplog(ts, "i", "b"),
                make_oplog(ts + 1, "i", "c"),
            ])
            .await
            .unwrap();

        let result = f.batcher.batch_more().await.unwrap();
        assert!(result.barrier);
        let placed: Vec<_> = result.group.iter().flatten().collect();
        assert_eq!(placed.len(), 1);
        assert!(placed[0].parsed.is_apply_ops());
        assert_eq!(
            placed[0].parsed.object["applyOps"].as_array().unwrap().len(),
            2
        );
    }
}
