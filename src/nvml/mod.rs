//! NVML interface for NVIDIA GPU metrics
//!
//! This module provides a safe abstraction over the NVIDIA Management
//! Library, exposing device enumeration and the per-metric query
//! functions the sampler executes each tick.
//!
//! # Thread Safety
//!
//! `NvmlBackend` is `Send + Sync`; the library handle lives behind a
//! `parking_lot::RwLock` and queries take a shared lock. Callers are
//! still expected to issue queries sequentially; NVML is not assumed
//! safe for concurrent same-process access.
//!
//! # Shutdown
//!
//! `shutdown` is idempotent and never fails: releasing the handle drops
//! the underlying library context, and any cleanup error is swallowed
//! by the binding. Teardown runs where no caller can act on failure.

use std::fmt;

use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

/// GPU utilization rates, both fields from one hardware query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilizationReading {
    /// GPU compute utilization percentage (0-100)
    pub gpu: u32,
    /// Memory bandwidth utilization percentage (0-100)
    pub memory: u32,
}

/// Framebuffer memory counters in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// BAR1 aperture counters in bytes, both fields from one hardware query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bar1Reading {
    pub total: u64,
    pub used: u64,
}

/// Selects which clock domain a clock query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSelector {
    Graphics,
    Memory,
    Sm,
}

impl ClockSelector {
    fn as_nvml(self) -> Clock {
        match self {
            ClockSelector::Graphics => Clock::Graphics,
            ClockSelector::Memory => Clock::Memory,
            ClockSelector::Sm => Clock::SM,
        }
    }
}

/// The raw hardware query boundary consumed by the sampler.
///
/// One method per metric query, each taking a device index and
/// returning a plain value or an error. `init` brings the library up
/// and returns the device count; everything else is only meaningful
/// after a successful `init`.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NvmlInterface: Send + Sync + fmt::Debug {
    /// Bring up the management library and enumerate devices.
    fn init(&self) -> Result<u32>;

    /// Product name of the device, e.g. "NVIDIA A100-SXM4-40GB".
    fn device_name(&self, index: u32) -> Result<String>;

    /// Current performance state (P-state), 0 = maximum performance.
    fn performance_state(&self, index: u32) -> Result<i64>;

    /// BAR1 total and used, one query for the pair.
    fn bar1_memory_info(&self, index: u32) -> Result<Bar1Reading>;

    /// Clock speed in MHz for the selected domain. May be unsupported
    /// on a given GPU model or driver independently of global init.
    fn clock_info(&self, index: u32, clock: ClockSelector) -> Result<u32>;

    /// GPU and memory utilization, one query for the pair.
    fn utilization_rates(&self, index: u32) -> Result<UtilizationReading>;

    /// Core temperature in degrees Celsius.
    fn temperature(&self, index: u32) -> Result<u32>;

    /// Power draw in milliwatts.
    fn power_usage(&self, index: u32) -> Result<u32>;

    /// Framebuffer memory counters in bytes.
    fn memory_info(&self, index: u32) -> Result<MemoryReading>;

    /// Release the library handle. Idempotent, never fails.
    fn shutdown(&self);
}

fn query_err(e: NvmlError) -> Error {
    Error::query(e.to_string())
}

/// Production implementation over `nvml-wrapper`
#[derive(Default)]
pub struct NvmlBackend {
    inner: RwLock<Option<Nvml>>,
}

impl NvmlBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for NvmlBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initialized = self.inner.read().is_some();
        f.debug_struct("NvmlBackend").field("initialized", &initialized).finish()
    }
}

impl NvmlInterface for NvmlBackend {
    fn init(&self) -> Result<u32> {
        let mut guard = self.inner.write();
        if guard.is_none() {
            *guard = Some(Nvml::init().map_err(|e| Error::init(e.to_string()))?);
        }
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        nvml.device_count().map_err(|e| Error::init(e.to_string()))
    }

    fn device_name(&self, index: u32) -> Result<String> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        device.name().map_err(query_err)
    }

    fn performance_state(&self, index: u32) -> Result<i64> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        let state = device.performance_state().map_err(query_err)?;
        Ok(state.as_c() as i64)
    }

    fn bar1_memory_info(&self, index: u32) -> Result<Bar1Reading> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        let bar1 = device.bar1_memory_info().map_err(query_err)?;
        Ok(Bar1Reading { total: bar1.total, used: bar1.used })
    }

    fn clock_info(&self, index: u32, clock: ClockSelector) -> Result<u32> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        device.clock_info(clock.as_nvml()).map_err(query_err)
    }

    fn utilization_rates(&self, index: u32) -> Result<UtilizationReading> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        let util = device.utilization_rates().map_err(query_err)?;
        Ok(UtilizationReading { gpu: util.gpu, memory: util.memory })
    }

    fn temperature(&self, index: u32) -> Result<u32> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        device.temperature(TemperatureSensor::Gpu).map_err(query_err)
    }

    fn power_usage(&self, index: u32) -> Result<u32> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        device.power_usage().map_err(query_err)
    }

    fn memory_info(&self, index: u32) -> Result<MemoryReading> {
        let guard = self.inner.read();
        let nvml = guard.as_ref().ok_or(Error::Uninitialized)?;
        let device = nvml.device_by_index(index).map_err(query_err)?;
        let memory = device.memory_info().map_err(query_err)?;
        Ok(MemoryReading { total: memory.total, used: memory.used, free: memory.free })
    }

    fn shutdown(&self) {
        // Dropping the handle runs nvmlShutdown; the binding ignores
        // cleanup errors, which is the contract here.
        if self.inner.write().take().is_some() {
            debug!("NVML handle released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_selector_maps_to_nvml_domains() {
        assert_eq!(ClockSelector::Graphics.as_nvml(), Clock::Graphics);
        assert_eq!(ClockSelector::Memory.as_nvml(), Clock::Memory);
        assert_eq!(ClockSelector::Sm.as_nvml(), Clock::SM);
    }

    #[test]
    fn mock_interface_scripts_queries() {
        let mut mock = MockNvmlInterface::new();
        mock.expect_init().times(1).returning(|| Ok(2));
        mock.expect_power_usage().returning(|_| Ok(75_000));

        assert_eq!(mock.init().unwrap(), 2);
        assert_eq!(mock.power_usage(0).unwrap(), 75_000);
    }

    #[test]
    fn uninitialized_backend_refuses_queries() {
        let backend = NvmlBackend::new();
        assert!(matches!(backend.temperature(0), Err(Error::Uninitialized)));
        // shutdown on a never-initialized backend is a no-op
        backend.shutdown();
        backend.shutdown();
    }
}
