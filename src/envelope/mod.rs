//! Normalization of raw samples into the uniform published envelope.

use serde::{Deserialize, Serialize};

use crate::metrics::{MetricValue, RawSample};

fn is_false(v: &bool) -> bool {
    !*v
}

/// The uniform published-metric record.
///
/// `measurements` and `values` are always single-element arrays
/// mirroring `name` and `value`; the format keeps a multi-value shape
/// but this sampler never emits more than one value per envelope.
/// `degraded` marks a fallback (zeroed) value and is omitted from the
/// wire shape when false, so consumers of the original payload see an
/// unchanged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub name: String,
    pub value: MetricValue,
    /// `"<sensor_name>.gpu<device_index>"`
    pub device: String,
    #[serde(rename = "id")]
    pub device_index: u32,
    /// Milliseconds since the Unix epoch, shared by the whole batch
    pub timestamp: i64,
    pub measurements: Vec<String>,
    pub values: Vec<MetricValue>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

/// Convert one raw sample into its envelope. Pure and total: every raw
/// sample maps to exactly one envelope, there is no failure mode.
pub fn normalize(sample: &RawSample, sensor_name: &str, timestamp: i64) -> MetricEnvelope {
    let name = sample.kind.canonical_name().to_string();
    MetricEnvelope {
        measurements: vec![name.clone()],
        values: vec![sample.value],
        device: format!("{sensor_name}.gpu{}", sample.device_index),
        device_index: sample.device_index,
        timestamp,
        degraded: sample.is_fallback(),
        name,
        value: sample.value,
    }
}

/// The ordered envelope sequence for one tick.
///
/// Envelopes are grouped by device index ascending and follow catalog
/// order within a device; all of them share `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub timestamp: i64,
    pub envelopes: Vec<MetricEnvelope>,
}

impl Batch {
    pub fn new(timestamp: i64, envelopes: Vec<MetricEnvelope>) -> Self {
        Self { timestamp, envelopes }
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricEnvelope> {
        self.envelopes.iter()
    }
}
