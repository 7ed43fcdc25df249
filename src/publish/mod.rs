//! Tag enrichment and assembly of the downstream published batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::envelope::Batch;
use crate::metrics::MetricValue;

/// Static and per-metric tags keyed by name
pub type Tags = BTreeMap<String, String>;

/// The record shape expected by the host transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMetric {
    pub name: String,
    pub value: MetricValue,
    /// Milliseconds since the Unix epoch, shared by the whole batch
    pub timestamp: i64,
    pub tags: Tags,
}

/// One tick's worth of publishable records plus the worker identifier
/// the host uses for debug and log attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedBatch {
    pub worker_id: String,
    pub metrics: Vec<PublishedMetric>,
}

/// Attach tags and flatten a batch into the transport shape.
///
/// Each record gets its own copy of the static tags before the
/// `id = "gpu_<index>"` key is inserted, so mutating one record's tags
/// never affects another's. Record order is the batch's envelope
/// order; every record shares the batch timestamp.
pub fn assemble(batch: &Batch, static_tags: &Tags, sensor_name: &str) -> PublishedBatch {
    let metrics = batch
        .iter()
        .map(|envelope| {
            let mut tags = static_tags.clone();
            tags.insert("id".to_string(), format!("gpu_{}", envelope.device_index));
            PublishedMetric {
                name: envelope.name.clone(),
                value: envelope.value,
                timestamp: batch.timestamp,
                tags,
            }
        })
        .collect();

    PublishedBatch { worker_id: sensor_name.to_string(), metrics }
}
