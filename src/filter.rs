//! Record filtering
//!
//! A [`FilterChain`] decides whether a record is dropped before it can
//! reach any worker; the standalone detectors ([`DdlFilter`],
//! [`MigrateFilter`]) classify records the batcher must treat specially
//! rather than drop.
//!
//! All filters are plain constructed values passed into the [`Batcher`]
//! (no process-wide singletons), so each instance can be configured and
//! tested in isolation.
//!
//! [`Batcher`]: crate::batcher::Batcher

use crate::oplog::ParsedLog;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Predicate over a parsed record. Returning `true` means "drop this
/// record before it reaches any worker".
pub trait OplogFilter: Send + Sync {
    /// Filter name, used in debug logging when a record is dropped.
    fn name(&self) -> &str;

    /// Whether the record must be dropped.
    fn filter(&self, log: &ParsedLog) -> bool;
}

/// Ordered chain of filters; the first match drops the record.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn OplogFilter>>,
}

impl FilterChain {
    /// An empty chain that passes every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the chain.
    pub fn with(mut self, filter: impl OplogFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Run the chain; `Some(name)` identifies the filter that dropped
    /// the record, `None` means the record passes.
    pub fn matched_by(&self, log: &ParsedLog) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.filter(log))
            .map(|f| f.name())
    }

    /// Whether any filter in the chain drops the record.
    pub fn iterate_filter(&self, log: &ParsedLog) -> bool {
        self.matched_by(log).is_some()
    }
}

/// Drops periodic no-op heartbeat records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilter;

impl OplogFilter for NoopFilter {
    fn name(&self) -> &str {
        "noop"
    }

    fn filter(&self, log: &ParsedLog) -> bool {
        log.is_noop()
    }
}

/// Replication-group filter: drops records whose `gid` is not in the
/// configured allow-list. An empty allow-list passes everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GidFilter {
    allowed: HashSet<String>,
}

impl GidFilter {
    /// Build from the set of replication-group ids this collector owns.
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl OplogFilter for GidFilter {
    fn name(&self) -> &str {
        "gid"
    }

    fn filter(&self, log: &ParsedLog) -> bool {
        !self.allowed.is_empty() && !self.allowed.contains(&log.gid)
    }
}

/// Detects schema-change (DDL) records: command entries that are not an
/// `applyOps` transaction body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlFilter;

impl DdlFilter {
    pub fn new() -> Self {
        Self
    }

    /// Whether the record is a schema change.
    pub fn matches(&self, log: &ParsedLog) -> bool {
        log.is_command() && !log.is_apply_ops()
    }
}

/// Detects records produced by a chunk migration. Observing one
/// mid-replication is an unrecoverable consistency violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateFilter;

impl MigrateFilter {
    pub fn new() -> Self {
        Self
    }

    /// Whether the record came from a chunk migration.
    pub fn matches(&self, log: &ParsedLog) -> bool {
        log.from_migrate
    }
}
