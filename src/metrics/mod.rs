//! The fixed per-device metric catalog and raw sample types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One kind of hardware counter sampled per device per tick.
///
/// The catalog is fixed; [`CATALOG`] gives the order samples are
/// emitted in for each device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    PerfState,
    Bar1Total,
    Bar1Used,
    GraphicsClock,
    MemoryClock,
    SmClock,
    GpuUtil,
    MemUtil,
    Temp,
    Power,
    MemUsed,
}

/// Emission order within one device: performance state, BAR1 pair,
/// clock triplet, utilization pair, temperature, power, memory used.
pub const CATALOG: [MetricKind; 11] = [
    MetricKind::PerfState,
    MetricKind::Bar1Total,
    MetricKind::Bar1Used,
    MetricKind::GraphicsClock,
    MetricKind::MemoryClock,
    MetricKind::SmClock,
    MetricKind::GpuUtil,
    MetricKind::MemUtil,
    MetricKind::Temp,
    MetricKind::Power,
    MetricKind::MemUsed,
];

/// Unit of a metric kind's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Dimensionless counter (performance state)
    Count,
    /// Percentage, 0-100
    Percent,
    /// Raw byte count
    Bytes,
    /// Megabytes (converted from bytes)
    Megabytes,
    /// Degrees Celsius
    Celsius,
    /// Watts (converted from milliwatts)
    Watts,
    /// Clock speed in MHz
    Megahertz,
}

impl MetricKind {
    /// The canonical wire name, used for both `name` and
    /// `measurements[0]` in the envelope.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            MetricKind::PerfState => "perf_state",
            MetricKind::Bar1Total => "bar1_total",
            MetricKind::Bar1Used => "bar1_used",
            MetricKind::GraphicsClock => "graphics_clock",
            MetricKind::MemoryClock => "memory_clock",
            MetricKind::SmClock => "sm_clock",
            MetricKind::GpuUtil => "gpu_util",
            MetricKind::MemUtil => "mem_util",
            MetricKind::Temp => "temp",
            MetricKind::Power => "power",
            MetricKind::MemUsed => "mem_used",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            MetricKind::PerfState => Unit::Count,
            MetricKind::Bar1Total | MetricKind::Bar1Used => Unit::Bytes,
            MetricKind::GraphicsClock | MetricKind::MemoryClock | MetricKind::SmClock => {
                Unit::Megahertz
            },
            MetricKind::GpuUtil | MetricKind::MemUtil => Unit::Percent,
            MetricKind::Temp => Unit::Celsius,
            MetricKind::Power => Unit::Watts,
            MetricKind::MemUsed => Unit::Megabytes,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// A metric value, integer for direct counter reads and float for
/// converted quantities (watts, megabytes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// Whether a sample carries a measured value or the zero sentinel
/// substituted after a recoverable query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    Measured,
    Fallback,
}

/// One (device, kind) reading produced by a single hardware query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub kind: MetricKind,
    pub device_index: u32,
    pub value: MetricValue,
    pub origin: SampleOrigin,
}

impl RawSample {
    pub fn measured(kind: MetricKind, device_index: u32, value: impl Into<MetricValue>) -> Self {
        Self { kind, device_index, value: value.into(), origin: SampleOrigin::Measured }
    }

    /// The fallback sentinel for a failed recoverable query: zero in
    /// the kind's value type.
    pub fn fallback(kind: MetricKind, device_index: u32) -> Self {
        let value = match kind.unit() {
            Unit::Watts | Unit::Megabytes => MetricValue::Float(0.0),
            _ => MetricValue::Int(0),
        };
        Self { kind, device_index, value, origin: SampleOrigin::Fallback }
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == SampleOrigin::Fallback
    }
}
