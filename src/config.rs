//! Collector configuration
//!
//! Plain structs with defaults and builders, one per component.

use crate::oplog::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the [`Batcher`](crate::batcher::Batcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Soft cap on records merged per round by the opportunistic drain.
    /// The first queue read may exceed it by one slice.
    pub merge_batch_max: usize,
    /// Whether schema-change (DDL) records are replicated. When false
    /// they are treated as filtered.
    pub incr_sync_ddl: bool,
    /// Timestamp at which the full (baseline) sync finished. A DDL
    /// record at or below this position is a fatal ordering violation.
    pub full_sync_finish_position: Timestamp,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            merge_batch_max: 1024,
            incr_sync_ddl: true,
            full_sync_finish_position: 0,
        }
    }
}

impl BatcherConfig {
    /// Create a new builder.
    pub fn builder() -> BatcherConfigBuilder {
        BatcherConfigBuilder::default()
    }
}

/// Builder for [`BatcherConfig`].
#[derive(Default)]
pub struct BatcherConfigBuilder {
    config: BatcherConfig,
}

impl BatcherConfigBuilder {
    /// Set the per-round merge cap.
    pub fn merge_batch_max(mut self, max: usize) -> Self {
        self.config.merge_batch_max = max;
        self
    }

    /// Enable or disable DDL replication.
    pub fn incr_sync_ddl(mut self, enabled: bool) -> Self {
        self.config.incr_sync_ddl = enabled;
        self
    }

    /// Set the full-sync finish position.
    pub fn full_sync_finish_position(mut self, ts: Timestamp) -> Self {
        self.config.full_sync_finish_position = ts;
        self
    }

    /// Build the config.
    pub fn build(self) -> BatcherConfig {
        self.config
    }
}

/// Configuration for the [`EventReader`](crate::reader::EventReader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// How long a [`next`](crate::reader::EventReader::next) call waits
    /// for a buffered record before signalling a timeout.
    #[serde(with = "duration_secs")]
    pub pull_timeout: Duration,
    /// Capacity of the bounded buffer between the fetch task and the
    /// consumer. A full buffer backpressures the fetch loop.
    pub buffer_size: usize,
    /// Pause after a connect failure or after the stream reports it is
    /// caught up.
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_secs(3),
            buffer_size: 256,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl ReaderConfig {
    /// Create a new builder.
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }
}

/// Builder for [`ReaderConfig`].
#[derive(Default)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    /// Set the consumer pull timeout.
    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.config.pull_timeout = timeout;
        self
    }

    /// Set the bounded buffer capacity.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size.max(1);
        self
    }

    /// Set the fetch-loop retry backoff.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Build the config.
    pub fn build(self) -> ReaderConfig {
        self.config
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
