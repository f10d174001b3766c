//! Transaction gathering
//!
//! Records sharing one logical timestamp are fragments of a single
//! multi-statement transaction. [`gather_apply_ops`] merges an ordered
//! fragment sequence into one composite `applyOps` command record so the
//! transaction reaches exactly one worker as an atomic unit.
//!
//! Malformed framing (empty fragment set, mixed timestamps, non-data
//! fragments) is an error, and the batcher treats it as fatal: a broken
//! transaction cannot be partially replayed.

use crate::error::{CollectorError, Result};
use crate::oplog::{GenericOplog, ParsedLog};
use serde_json::{json, Value};

/// Namespace composite transaction records are issued against.
const APPLY_OPS_NAMESPACE: &str = "admin.$cmd";

/// Merge equal-timestamp fragments into one composite `applyOps` record.
///
/// The composite keeps the fragments' relative order in its `applyOps`
/// array and carries the shared timestamp, so downstream ordering checks
/// see it as one record.
pub fn gather_apply_ops(fragments: &[ParsedLog]) -> Result<GenericOplog> {
    let first = fragments
        .first()
        .ok_or_else(|| CollectorError::gather("empty fragment set"))?;
    let timestamp = first.timestamp;

    let mut ops = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if fragment.timestamp != timestamp {
            return Err(CollectorError::gather(format!(
                "fragment ts {} differs from transaction ts {}",
                fragment.timestamp, timestamp
            )));
        }
        if !fragment.is_data_op() {
            return Err(CollectorError::gather(format!(
                "non-data op {:?} in {} cannot be part of a transaction",
                fragment.operation, fragment.namespace
            )));
        }
        let mut op = json!({
            "op": fragment.operation,
            "ns": fragment.namespace,
            "o": fragment.object,
        });
        if !fragment.query.is_null() {
            op["o2"] = fragment.query.clone();
        }
        ops.push(op);
    }

    let parsed = ParsedLog {
        timestamp,
        operation: "c".into(),
        gid: first.gid.clone(),
        namespace: APPLY_OPS_NAMESPACE.into(),
        object: json!({ "applyOps": ops }),
        query: Value::Null,
        from_migrate: false,
    };
    GenericOplog::from_parsed(parsed)
}
