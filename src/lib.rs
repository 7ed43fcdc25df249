//! nvml-metrics - Periodic NVIDIA GPU telemetry sampling over NVML
//!
//! This crate queries per-device hardware counters from the NVIDIA
//! Management Library on a cadence driven by a host poll loop, and
//! emits one normalized batch of named, timestamped, tagged metric
//! samples per tick, ready for downstream publication. Scheduling and
//! transport belong to the host; this crate owns the
//! sampling-and-normalization pipeline.
//!
//! # Features
//!
//! - **Device discovery**: NVML initialization and enumeration behind
//!   an explicitly owned adapter with `Uninitialized`/`Healthy`/
//!   `Degraded` lifecycle state
//! - **Fixed metric catalog**: performance state, BAR1 memory, clock
//!   triplet, GPU/memory utilization, temperature, power and memory
//!   used; eleven samples per device per tick, in a fixed order
//! - **Partial-failure isolation**: a failed clock or memory query
//!   zeroes only the affected metrics (marked `degraded`), a failed
//!   fundamental read skips only that device, and an initialization
//!   failure degrades the whole interface without aborting the host
//! - **Uniform envelopes**: every sample becomes a
//!   `{name, value, device, timestamp, measurements, values}` record
//!   sharing one tick timestamp
//! - **Tag enrichment**: host static tags plus `id = "gpu_<index>"`
//!   per record, merged non-destructively
//!
//! # Examples
//!
//! ```no_run
//! use nvml_metrics::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sampler = GpuSampler::new(SamplerConfig::default());
//!     sampler.initialize().await?;
//!
//!     let static_tags = Tags::from([
//!         ("root".to_string(), "theta".to_string()),
//!         ("plugin".to_string(), "nvml_pub".to_string()),
//!     ]);
//!
//!     let published = sampler.read(&static_tags).await?;
//!     println!("{}: {} metrics", published.worker_id, published.metrics.len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Sampling never takes the host process down. The two "no data this
//! tick" results are structured values:
//!
//! ```no_run
//! use nvml_metrics::prelude::*;
//!
//! async fn tick(sampler: &GpuSampler) -> Result<()> {
//!     match sampler.sample().await {
//!         Ok(batch) => println!("{} envelopes", batch.len()),
//!         // keep scheduling; the driver may load later
//!         Err(e) if e.is_no_data() => println!("skipping tick: {e}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Thread Safety
//!
//! `GpuSampler` and `DeviceAdapter` are `Send + Sync` and cheap to
//! clone (clones share state). Hardware queries are issued strictly
//! sequentially per tick; NVML is not assumed safe for concurrent
//! same-process access.

pub mod adapter;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod nvml;
pub mod publish;
pub mod sampler;

pub use error::{Error, Result};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::adapter::{AdapterState, DeviceAdapter, DeviceInfo};
    pub use crate::envelope::{Batch, MetricEnvelope};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{MetricKind, MetricValue, RawSample, SampleOrigin, CATALOG};
    pub use crate::publish::{assemble, PublishedBatch, PublishedMetric, Tags};
    pub use crate::sampler::{GpuSampler, Sampler, SamplerConfig};
}
