//! Collector metrics
//!
//! Lock-free counters for the hot path, shared by `Arc` between the
//! batcher, the reader and whoever scrapes them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one collector instance.
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    /// Records placed into worker batches
    dispatched: AtomicU64,
    /// Records dropped by the filter chain
    filtered: AtomicU64,
    /// Transactions gathered into composites
    transactions: AtomicU64,
    /// Rounds that returned a barrier
    barriers: AtomicU64,
    /// Records pulled off the change stream
    reader_events: AtomicU64,
    /// Errors surfaced through the reader channel
    reader_errors: AtomicU64,
    /// Consumer pulls that hit the timeout bound
    reader_timeouts: AtomicU64,
}

impl CollectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dispatched(&self, n: u64) {
        self.dispatched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_filtered(&self, n: u64) {
        self.filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_barrier(&self) {
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reader_event(&self) {
        self.reader_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reader_error(&self) {
        self.reader_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reader_timeout(&self) {
        self.reader_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
            reader_events: self.reader_events.load(Ordering::Relaxed),
            reader_errors: self.reader_errors.load(Ordering::Relaxed),
            reader_timeouts: self.reader_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`CollectorMetrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub filtered: u64,
    pub transactions: u64,
    pub barriers: u64,
    pub reader_events: u64,
    pub reader_errors: u64,
    pub reader_timeouts: u64,
}
