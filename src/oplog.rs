//! Oplog record representation
//!
//! Unified record structure for change-stream entries as they move through
//! the collector: an opaque raw payload plus a parsed view used by filters,
//! the partitioner and the transaction merger.
//!
//! Records are created once by the reader layer and treated as read-only
//! from that point on; they are shared by cheap clone ([`Bytes`] +
//! [`serde_json::Value`]) and never mutated downstream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical source timestamp, MongoDB-style: `seconds << 32 | increment`.
///
/// Signed so that "unset" markers (`-1`) stay representable; every real
/// timestamp produced by a source is positive.
pub type Timestamp = i64;

/// Compose a logical timestamp from wall-clock seconds and an increment.
pub fn compose_ts(secs: u32, inc: u32) -> Timestamp {
    ((secs as i64) << 32) | inc as i64
}

/// Extract the seconds component of a logical timestamp.
pub fn ts_seconds(ts: Timestamp) -> u32 {
    (ts >> 32) as u32
}

/// Parsed view of an oplog entry.
///
/// Only the fields the collector inspects are modeled; everything else
/// stays inside the raw payload of the enclosing [`GenericOplog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLog {
    /// Source-assigned logical timestamp, used for ordering and for
    /// grouping transaction fragments.
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,

    /// Operation code: `"i"` insert, `"u"` update, `"d"` delete,
    /// `"c"` command, `"n"` no-op.
    #[serde(rename = "op")]
    pub operation: String,

    /// Replication group id stamped by the source, empty if unset.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gid: String,

    /// Namespace the operation applies to (`db.collection`).
    #[serde(rename = "ns")]
    pub namespace: String,

    /// Operation document (inserted doc, update spec, command body).
    #[serde(rename = "o", default)]
    pub object: Value,

    /// Selector document for updates/deletes (`_id` lives here).
    #[serde(rename = "o2", default, skip_serializing_if = "Value::is_null")]
    pub query: Value,

    /// Set on operations produced by a chunk migration rather than a
    /// client write.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_migrate: bool,
}

impl ParsedLog {
    /// Whether this is a data mutation (insert/update/delete).
    pub fn is_data_op(&self) -> bool {
        matches!(self.operation.as_str(), "i" | "u" | "d")
    }

    /// Whether this is a command entry.
    pub fn is_command(&self) -> bool {
        self.operation == "c"
    }

    /// Whether this is a periodic no-op heartbeat entry.
    pub fn is_noop(&self) -> bool {
        self.operation == "n"
    }

    /// Whether this command entry carries an `applyOps` transaction body.
    pub fn is_apply_ops(&self) -> bool {
        self.is_command() && self.object.get("applyOps").is_some()
    }

    /// The document key this record routes on: `_id` of the object for
    /// inserts, `_id` of the selector for updates/deletes.
    pub fn document_key(&self) -> Option<&Value> {
        match self.operation.as_str() {
            "i" => self.object.get("_id"),
            "u" | "d" => self.query.get("_id").or_else(|| self.object.get("_id")),
            _ => None,
        }
    }
}

/// A change record: raw wire payload plus its parsed view.
#[derive(Debug, Clone)]
pub struct GenericOplog {
    /// Raw payload exactly as pulled from the change stream.
    pub raw: Bytes,
    /// Parsed view used by filters, partitioning and merging.
    pub parsed: ParsedLog,
}

impl GenericOplog {
    /// Build a record from a raw payload and its parsed view.
    pub fn new(raw: Bytes, parsed: ParsedLog) -> Self {
        Self { raw, parsed }
    }

    /// Build a record whose raw payload is the JSON encoding of the
    /// parsed view. Used for synthesized records (gathered transactions)
    /// and in tests.
    pub fn from_parsed(parsed: ParsedLog) -> crate::Result<Self> {
        let raw = serde_json::to_vec(&parsed)
            .map_err(|e| crate::CollectorError::serialization(e.to_string()))?;
        Ok(Self {
            raw: Bytes::from(raw),
            parsed,
        })
    }
}
