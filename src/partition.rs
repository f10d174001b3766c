//! Worker assignment
//!
//! Deterministically routes a record to one of N workers so that all
//! records for the same routing key land on the same worker, preserving
//! per-key ordering across the parallel worker pool.

use crate::oplog::ParsedLog;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// What part of a record the worker assignment hashes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrategy {
    /// Hash on the namespace (per-collection ordering).
    Namespace,
    /// Hash on the document key, falling back to the namespace for
    /// records without one (per-document ordering).
    DocumentId,
}

impl Default for HashStrategy {
    fn default() -> Self {
        Self::DocumentId
    }
}

/// Deterministic record-to-worker assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OplogHasher {
    strategy: HashStrategy,
}

impl OplogHasher {
    pub fn new(strategy: HashStrategy) -> Self {
        Self { strategy }
    }

    /// Worker index in `[0, worker_count)` for this record. Stable
    /// across rounds for a given routing key.
    pub fn assign(&self, log: &ParsedLog, worker_count: usize) -> usize {
        let worker_count = worker_count.max(1);
        let mut hasher = DefaultHasher::new();
        match self.strategy {
            HashStrategy::Namespace => log.namespace.hash(&mut hasher),
            HashStrategy::DocumentId => match log.document_key() {
                Some(key) => {
                    // Namespace participates so equal keys in different
                    // collections spread across workers.
                    log.namespace.hash(&mut hasher);
                    key.to_string().hash(&mut hasher);
                }
                None => log.namespace.hash(&mut hasher),
            },
        }
        (murmur3_finalize(hasher.finish()) as usize) % worker_count
    }
}

/// Murmur3 finalization for better distribution.
fn murmur3_finalize(mut h: u64) -> u32 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h as u32
}
