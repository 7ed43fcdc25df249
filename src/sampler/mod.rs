//! Per-tick execution of the metric catalog across all devices.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::task;
use tokio::time::timeout;
use tracing::warn;

use crate::adapter::DeviceAdapter;
use crate::envelope::{normalize, Batch};
use crate::error::{Error, Result};
use crate::metrics::{MetricKind, RawSample, CATALOG};
use crate::nvml::{ClockSelector, NvmlInterface};
use crate::publish::{assemble, PublishedBatch, Tags};

/// Sampling configuration supplied by the host
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Sensor identifier; seeds the envelope `device` field and the
    /// worker id of published batches
    pub sensor_name: String,
    /// Upper bound on one device's query session. A timed-out device
    /// counts as failed for the tick; sampling continues with the next.
    pub query_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { sensor_name: "nvml_pub".to_string(), query_timeout: Duration::from_secs(2) }
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// One normalized batch per invocation.
///
/// Implementations must be safe to call repeatedly: a degraded or
/// uninitialized interface yields the structured no-data errors
/// ([`Error::Degraded`], [`Error::Uninitialized`]) without touching
/// the hardware. Hosts keep scheduling future ticks since an
/// initialization failure is not necessarily permanent.
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Sample every device with the given shared tick timestamp
    /// (milliseconds since the Unix epoch).
    async fn sample_at(&self, timestamp: i64) -> Result<Batch>;

    /// Sample every device, stamping the tick with the current time.
    async fn sample(&self) -> Result<Batch> {
        self.sample_at(epoch_millis()).await
    }
}

/// Samples the fixed metric catalog from every enumerated GPU.
///
/// # Examples
///
/// ```no_run
/// use nvml_metrics::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let sampler = GpuSampler::new(SamplerConfig::default());
///     sampler.initialize().await?;
///
///     let batch = sampler.sample().await?;
///     for envelope in batch.iter() {
///         println!("{} {} = {:?}", envelope.device, envelope.name, envelope.value);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GpuSampler {
    adapter: DeviceAdapter,
    config: SamplerConfig,
}

impl GpuSampler {
    /// Sampler over the production NVML backend
    pub fn new(config: SamplerConfig) -> Self {
        Self::with_adapter(DeviceAdapter::new(), config)
    }

    /// Sampler over a caller-supplied adapter (a mock backend in tests)
    pub fn with_adapter(adapter: DeviceAdapter, config: SamplerConfig) -> Self {
        Self { adapter, config }
    }

    pub fn adapter(&self) -> &DeviceAdapter {
        &self.adapter
    }

    pub fn sensor_name(&self) -> &str {
        &self.config.sensor_name
    }

    /// Initialize the management interface off the async executor.
    pub async fn initialize(&self) -> Result<u32> {
        let adapter = self.adapter.clone();
        task::spawn_blocking(move || adapter.initialize())
            .await
            .map_err(|e| Error::init(format!("initialization task failed: {e}")))?
    }

    /// Sample and assemble the transport-ready batch in one call,
    /// tagging every record with the host's static tags.
    pub async fn read(&self, static_tags: &Tags) -> Result<PublishedBatch> {
        let batch = self.sample().await?;
        Ok(assemble(&batch, static_tags, &self.config.sensor_name))
    }
}

#[async_trait]
impl Sampler for GpuSampler {
    async fn sample_at(&self, timestamp: i64) -> Result<Batch> {
        // Short-circuits with zero hardware queries unless healthy.
        let device_count = self.adapter.device_count()?;
        let backend = self.adapter.backend();

        let mut envelopes = Vec::with_capacity(device_count as usize * CATALOG.len());
        for index in 0..device_count {
            let session = {
                let backend = Arc::clone(&backend);
                task::spawn_blocking(move || sample_device(backend.as_ref(), index))
            };
            // A timed-out session leaves its worker to finish on the
            // blocking pool; NVML calls cannot be cancelled mid-flight.
            match timeout(self.config.query_timeout, session).await {
                Err(_) => {
                    warn!(index, timeout = ?self.config.query_timeout, "device query session timed out, skipping device");
                },
                Ok(Err(e)) => {
                    warn!(index, error = %e, "device query session aborted, skipping device");
                },
                Ok(Ok(Err(e))) => {
                    warn!(index, error = %e, "device sampling failed, skipping device");
                },
                Ok(Ok(Ok(samples))) => {
                    envelopes.extend(
                        samples.iter().map(|s| normalize(s, &self.config.sensor_name, timestamp)),
                    );
                },
            }
        }

        Ok(Batch::new(timestamp, envelopes))
    }
}

/// Execute the catalog against one device, in catalog order.
///
/// `perf_state` and `temp` are fundamental reads: their failure fails
/// the whole device for this tick. Every other query recovers locally
/// with a tagged zero fallback so the remaining metrics still publish.
fn sample_device(backend: &dyn NvmlInterface, index: u32) -> Result<Vec<RawSample>> {
    let mut samples = Vec::with_capacity(CATALOG.len());

    let perf_state = backend.performance_state(index)?;
    samples.push(RawSample::measured(MetricKind::PerfState, index, perf_state));

    // BAR1 total and used come from one hardware query.
    match backend.bar1_memory_info(index) {
        Ok(bar1) => {
            samples.push(RawSample::measured(MetricKind::Bar1Total, index, bar1.total));
            samples.push(RawSample::measured(MetricKind::Bar1Used, index, bar1.used));
        },
        Err(e) => {
            warn!(index, error = %e, "BAR1 query failed, zeroing pair");
            samples.push(RawSample::fallback(MetricKind::Bar1Total, index));
            samples.push(RawSample::fallback(MetricKind::Bar1Used, index));
        },
    }

    samples.extend(read_clocks(backend, index));

    // GPU and memory utilization come from one hardware query.
    match backend.utilization_rates(index) {
        Ok(util) => {
            samples.push(RawSample::measured(MetricKind::GpuUtil, index, util.gpu));
            samples.push(RawSample::measured(MetricKind::MemUtil, index, util.memory));
        },
        Err(e) => {
            warn!(index, error = %e, "utilization query failed, zeroing pair");
            samples.push(RawSample::fallback(MetricKind::GpuUtil, index));
            samples.push(RawSample::fallback(MetricKind::MemUtil, index));
        },
    }

    let temp = backend.temperature(index)?;
    samples.push(RawSample::measured(MetricKind::Temp, index, temp));

    match backend.power_usage(index) {
        Ok(milliwatts) => {
            samples.push(RawSample::measured(MetricKind::Power, index, milliwatts as f64 / 1000.0));
        },
        Err(e) => {
            warn!(index, error = %e, "power query failed, zeroing");
            samples.push(RawSample::fallback(MetricKind::Power, index));
        },
    }

    match backend.memory_info(index) {
        Ok(memory) => {
            samples.push(RawSample::measured(
                MetricKind::MemUsed,
                index,
                memory.used as f64 / 1_048_576.0,
            ));
        },
        Err(e) => {
            warn!(index, error = %e, "memory query failed, zeroing");
            samples.push(RawSample::fallback(MetricKind::MemUsed, index));
        },
    }

    Ok(samples)
}

/// The clock triplet fails as a unit: the first failed domain zeroes
/// all three and the remaining clock queries are skipped.
fn read_clocks(backend: &dyn NvmlInterface, index: u32) -> [RawSample; 3] {
    let readings = backend
        .clock_info(index, ClockSelector::Graphics)
        .and_then(|graphics| {
            backend.clock_info(index, ClockSelector::Memory).map(|memory| (graphics, memory))
        })
        .and_then(|(graphics, memory)| {
            backend.clock_info(index, ClockSelector::Sm).map(|sm| (graphics, memory, sm))
        });

    match readings {
        Ok((graphics, memory, sm)) => [
            RawSample::measured(MetricKind::GraphicsClock, index, graphics),
            RawSample::measured(MetricKind::MemoryClock, index, memory),
            RawSample::measured(MetricKind::SmClock, index, sm),
        ],
        Err(e) => {
            warn!(index, error = %e, "clock query failed, zeroing clock triplet");
            [
                RawSample::fallback(MetricKind::GraphicsClock, index),
                RawSample::fallback(MetricKind::MemoryClock, index),
                RawSample::fallback(MetricKind::SmClock, index),
            ]
        },
    }
}

#[cfg(test)]
mod tests;
