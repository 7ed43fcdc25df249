use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::envelope::{Batch, MetricEnvelope};
use crate::metrics::MetricValue;
use crate::nvml::{Bar1Reading, MemoryReading, MockNvmlInterface, UtilizationReading};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A healthy interface with plausible readings for every query.
/// `customize` registers its expectations first; mockall matches in
/// FIFO order, so they take precedence over the defaults below.
fn scripted_with(
    device_count: u32,
    customize: impl FnOnce(&mut MockNvmlInterface),
) -> MockNvmlInterface {
    let mut mock = MockNvmlInterface::new();
    customize(&mut mock);
    mock.expect_init().returning(move || Ok(device_count));
    mock.expect_device_name().returning(|i| Ok(format!("NVIDIA A100 {i}")));
    mock.expect_performance_state().returning(|_| Ok(2));
    mock.expect_bar1_memory_info()
        .returning(|_| Ok(Bar1Reading { total: 268_435_456, used: 4_194_304 }));
    mock.expect_clock_info().returning(|_, _| Ok(1_410));
    mock.expect_utilization_rates()
        .returning(|_| Ok(UtilizationReading { gpu: 87, memory: 40 }));
    mock.expect_temperature().returning(|_| Ok(64));
    mock.expect_power_usage().returning(|_| Ok(75_000));
    mock.expect_memory_info().returning(|_| {
        Ok(MemoryReading { total: 42_949_672_960, used: 2_097_152, free: 42_947_575_808 })
    });
    mock
}

fn scripted(device_count: u32) -> MockNvmlInterface {
    scripted_with(device_count, |_| {})
}

async fn sampler_from(mock: MockNvmlInterface) -> GpuSampler {
    let adapter = DeviceAdapter::with_backend(Arc::new(mock));
    let sampler = GpuSampler::with_adapter(adapter, SamplerConfig::default());
    sampler.initialize().await.expect("mock initialization");
    sampler
}

fn names(batch: &Batch) -> Vec<&str> {
    batch.iter().map(|e| e.name.as_str()).collect()
}

fn envelope<'a>(batch: &'a Batch, device_index: u32, name: &str) -> &'a MetricEnvelope {
    batch
        .iter()
        .find(|e| e.device_index == device_index && e.name == name)
        .unwrap_or_else(|| panic!("no envelope {name} for device {device_index}"))
}

#[tokio::test]
async fn full_catalog_per_device_in_order() {
    init_tracing();
    let sampler = sampler_from(scripted(2)).await;
    let batch = sampler.sample().await.unwrap();

    assert_eq!(batch.len(), 22);

    let catalog_names: Vec<&str> = CATALOG.iter().map(|k| k.canonical_name()).collect();
    assert_eq!(&names(&batch)[..11], catalog_names.as_slice());
    assert_eq!(&names(&batch)[11..], catalog_names.as_slice());

    let indexes: Vec<u32> = batch.iter().map(|e| e.device_index).collect();
    assert_eq!(indexes, [vec![0u32; 11], vec![1u32; 11]].concat());

    assert_eq!(batch.envelopes[0].device, "nvml_pub.gpu0");
    assert_eq!(batch.envelopes[11].device, "nvml_pub.gpu1");
}

#[tokio::test]
async fn gpu_less_host_yields_empty_batch() {
    let mut mock = MockNvmlInterface::new();
    mock.expect_init().returning(|| Ok(0));

    let adapter = DeviceAdapter::with_backend(Arc::new(mock));
    let sampler = GpuSampler::with_adapter(adapter, SamplerConfig::default());
    assert_eq!(sampler.initialize().await.unwrap(), 0);

    let batch = sampler.sample().await.unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn batch_shares_single_timestamp() {
    let sampler = sampler_from(scripted(3)).await;
    let batch = sampler.sample_at(1_700_000_000_123).await.unwrap();

    assert_eq!(batch.timestamp, 1_700_000_000_123);
    assert!(batch.iter().all(|e| e.timestamp == 1_700_000_000_123));
}

#[tokio::test]
async fn degraded_interface_yields_no_data_without_queries() {
    // No query expectations are scripted: any hardware call after the
    // failed init would panic the mock and fail this test.
    let mut mock = MockNvmlInterface::new();
    mock.expect_init().times(1).returning(|| Err(Error::init("driver not loaded")));

    let adapter = DeviceAdapter::with_backend(Arc::new(mock));
    let sampler = GpuSampler::with_adapter(adapter, SamplerConfig::default());
    assert!(matches!(sampler.initialize().await, Err(Error::Init(_))));

    let err = sampler.sample().await.unwrap_err();
    assert!(matches!(err, Error::Degraded(_)));
    assert!(err.is_no_data());

    // still no retry on the next tick
    assert!(matches!(sampler.sample().await, Err(Error::Degraded(_))));
}

#[tokio::test]
async fn uninitialized_sampler_reports_uninitialized() {
    let mock = MockNvmlInterface::new();
    let adapter = DeviceAdapter::with_backend(Arc::new(mock));
    let sampler = GpuSampler::with_adapter(adapter, SamplerConfig::default());

    let err = sampler.sample().await.unwrap_err();
    assert!(matches!(err, Error::Uninitialized));
    assert!(err.is_no_data());
}

#[tokio::test]
async fn clock_failure_zeroes_the_whole_triplet() {
    let mock = scripted_with(1, |mock| {
        mock.expect_clock_info().returning(|_, domain| match domain {
            ClockSelector::Graphics => Ok(1_410),
            _ => Err(Error::query("clock domain not supported")),
        });
    });

    let sampler = sampler_from(mock).await;
    let batch = sampler.sample().await.unwrap();

    for clock in ["graphics_clock", "memory_clock", "sm_clock"] {
        let e = envelope(&batch, 0, clock);
        assert_eq!(e.value, MetricValue::Int(0), "{clock} not zeroed");
        assert!(e.degraded, "{clock} not marked degraded");
    }

    // everything else keeps its queried value
    assert_eq!(envelope(&batch, 0, "temp").value, MetricValue::Int(64));
    assert_eq!(envelope(&batch, 0, "gpu_util").value, MetricValue::Int(87));
    assert!(!envelope(&batch, 0, "temp").degraded);
    assert_eq!(batch.len(), 11);
}

#[tokio::test]
async fn fundamental_temperature_failure_skips_device_only() {
    init_tracing();
    let mock = scripted_with(2, |mock| {
        mock.expect_temperature().returning(|index| {
            if index == 0 {
                Err(Error::query("GPU is lost"))
            } else {
                Ok(64)
            }
        });
    });

    let sampler = sampler_from(mock).await;
    let batch = sampler.sample().await.unwrap();

    assert_eq!(batch.len(), 11);
    assert!(batch.iter().all(|e| e.device_index == 1));
}

#[tokio::test]
async fn fundamental_perf_state_failure_skips_device_only() {
    let mock = scripted_with(2, |mock| {
        mock.expect_performance_state().returning(|index| {
            if index == 1 {
                Err(Error::query("GPU is lost"))
            } else {
                Ok(2)
            }
        });
    });

    let sampler = sampler_from(mock).await;
    let batch = sampler.sample().await.unwrap();

    assert_eq!(batch.len(), 11);
    assert!(batch.iter().all(|e| e.device_index == 0));
}

#[tokio::test]
async fn power_and_memory_convert_units() {
    let sampler = sampler_from(scripted(1)).await;
    let batch = sampler.sample().await.unwrap();

    // 75000 mW -> 75.0 W, 2097152 B -> 2.0 MB
    assert_eq!(envelope(&batch, 0, "power").value, MetricValue::Float(75.0));
    assert_eq!(envelope(&batch, 0, "mem_used").value, MetricValue::Float(2.0));

    // direct reads stay integers
    assert_eq!(envelope(&batch, 0, "perf_state").value, MetricValue::Int(2));
    assert_eq!(envelope(&batch, 0, "bar1_total").value, MetricValue::Int(268_435_456));
    assert_eq!(envelope(&batch, 0, "bar1_used").value, MetricValue::Int(4_194_304));
}

#[tokio::test]
async fn recoverable_failures_fall_back_per_metric() {
    let mock = scripted_with(1, |mock| {
        // every non-fundamental query fails
        mock.expect_bar1_memory_info().returning(|_| Err(Error::query("unsupported")));
        mock.expect_utilization_rates().returning(|_| Err(Error::query("unsupported")));
        mock.expect_power_usage().returning(|_| Err(Error::query("unsupported")));
        mock.expect_memory_info().returning(|_| Err(Error::query("unsupported")));
    });

    let sampler = sampler_from(mock).await;
    let batch = sampler.sample().await.unwrap();

    // the device still publishes its full catalog
    assert_eq!(batch.len(), 11);

    for name in ["bar1_total", "bar1_used", "gpu_util", "mem_util"] {
        let e = envelope(&batch, 0, name);
        assert_eq!(e.value, MetricValue::Int(0));
        assert!(e.degraded);
    }
    for name in ["power", "mem_used"] {
        let e = envelope(&batch, 0, name);
        assert_eq!(e.value, MetricValue::Float(0.0));
        assert!(e.degraded);
    }
    assert!(!envelope(&batch, 0, "perf_state").degraded);
    assert!(!envelope(&batch, 0, "temp").degraded);
}

#[tokio::test]
async fn session_timeout_skips_device_only() {
    init_tracing();
    let mock = scripted_with(2, |mock| {
        mock.expect_performance_state().returning(|index| {
            if index == 0 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(2)
        });
    });

    let adapter = DeviceAdapter::with_backend(Arc::new(mock));
    let config =
        SamplerConfig { query_timeout: Duration::from_millis(50), ..SamplerConfig::default() };
    let sampler = GpuSampler::with_adapter(adapter, config);
    sampler.initialize().await.unwrap();

    let batch = sampler.sample().await.unwrap();
    assert_eq!(batch.len(), 11);
    assert!(batch.iter().all(|e| e.device_index == 1));
}

#[tokio::test]
async fn repeated_sampling_is_idempotent_in_shape() {
    let sampler = sampler_from(scripted(2)).await;

    let first = sampler.sample().await.unwrap();
    let second = sampler.sample().await.unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(names(&first), names(&second));
    let devices = |b: &Batch| b.iter().map(|e| e.device_index).collect::<Vec<_>>();
    assert_eq!(devices(&first), devices(&second));
}

#[tokio::test]
async fn read_attaches_static_tags_and_device_id() {
    let sampler = sampler_from(scripted(1)).await;
    let static_tags = Tags::from([
        ("root".to_string(), "theta".to_string()),
        ("plugin".to_string(), "nvml_pub".to_string()),
    ]);

    let published = sampler.read(&static_tags).await.unwrap();
    assert_eq!(published.worker_id, "nvml_pub");
    assert_eq!(published.metrics.len(), 11);
    for metric in &published.metrics {
        assert_eq!(metric.tags["root"], "theta");
        assert_eq!(metric.tags["plugin"], "nvml_pub");
        assert_eq!(metric.tags["id"], "gpu_0");
    }
}
