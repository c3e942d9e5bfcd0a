//! Metric records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seconds since the Unix epoch, as reported by the metrics server.
pub type Timestamp = i64;

/// One row of the metrics feed.
///
/// The server pivots samples so that every row carries a single timestamp and
/// one column per metric name. A column is `None` when that metric had no
/// sample at the row's timestamp.
///
/// # Fields
///
/// - `timestamp`: ordering and cursor key (JSON `Timestamp`)
/// - `source`: source tag (JSON `src`), empty when the server omits it
/// - `values`: every other column of the row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Row timestamp.
    #[serde(rename = "Timestamp", alias = "ts")]
    pub timestamp: Timestamp,
    /// Source tag.
    #[serde(rename = "src", default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Metric values keyed by metric name.
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl MetricRecord {
    /// Creates an empty record at the given timestamp.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            source: String::new(),
            values: BTreeMap::new(),
        }
    }

    /// Sets the source tag.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Adds a metric value.
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), Some(value));
        self
    }

    /// Returns the value of a metric, if sampled.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    /// Returns the cursor that requests only rows newer than this one.
    pub fn next_cursor(&self) -> Timestamp {
        self.timestamp.saturating_add(1)
    }

    /// Returns true if both records occupy the same (source, timestamp) slot.
    pub fn same_slot(&self, other: &MetricRecord) -> bool {
        self.timestamp == other.timestamp && self.source == other.source
    }
}
