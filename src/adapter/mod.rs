//! Owned device-interface context with explicit lifecycle state.
//!
//! [`DeviceAdapter`] wraps the raw [`NvmlInterface`] behind a small
//! state machine: `Uninitialized` → `Healthy` on a successful init,
//! `Uninitialized` → `Degraded` on failure. A degraded adapter
//! short-circuits every later call without touching the hardware
//! until the host explicitly asks to reinitialize; the underlying
//! init is expensive and must not be hammered once it has failed.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::nvml::{NvmlBackend, NvmlInterface};

/// Lifecycle state of the management interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    /// No initialization attempted since construction or shutdown
    Uninitialized,
    /// Interface up; `device_count` may be 0 on a GPU-less host
    Healthy { device_count: u32 },
    /// Initialization failed; sampling is skipped until reinitialized
    Degraded { reason: String },
}

/// A device discovered at enumeration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug)]
struct Inner {
    state: AdapterState,
    devices: Vec<DeviceInfo>,
}

/// Explicitly owned hardware-interface context shared by all ticks.
///
/// Cheap to clone; clones share state. Device enumeration happens once
/// per initialization cycle, never mid-tick.
#[derive(Debug, Clone)]
pub struct DeviceAdapter {
    backend: Arc<dyn NvmlInterface>,
    inner: Arc<RwLock<Inner>>,
}

impl Default for DeviceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAdapter {
    /// Adapter over the production NVML backend
    pub fn new() -> Self {
        Self::with_backend(Arc::new(NvmlBackend::new()))
    }

    /// Adapter over a caller-supplied backend (a mock in tests)
    pub fn with_backend(backend: Arc<dyn NvmlInterface>) -> Self {
        Self {
            backend,
            inner: Arc::new(RwLock::new(Inner {
                state: AdapterState::Uninitialized,
                devices: Vec::new(),
            })),
        }
    }

    /// Bring up the management interface and enumerate devices.
    ///
    /// Idempotent while healthy: returns the cached device count
    /// without another hardware call. While degraded it returns the
    /// recorded failure without retrying; use [`reinitialize`] to
    /// attempt recovery.
    ///
    /// [`reinitialize`]: DeviceAdapter::reinitialize
    pub fn initialize(&self) -> Result<u32> {
        let mut inner = self.inner.write();
        match &inner.state {
            AdapterState::Healthy { device_count } => return Ok(*device_count),
            AdapterState::Degraded { reason } => return Err(Error::degraded(reason.clone())),
            AdapterState::Uninitialized => {},
        }

        match self.backend.init() {
            Ok(device_count) => {
                inner.devices = self.enumerate(device_count);
                inner.state = AdapterState::Healthy { device_count };
                for device in &inner.devices {
                    info!(index = device.index, name = %device.name, "GPU discovered");
                }
                info!(device_count, "NVML interface initialized");
                Ok(device_count)
            },
            Err(e) => {
                let reason = e.to_string();
                warn!(%reason, "NVML initialization failed, entering degraded state");
                inner.state = AdapterState::Degraded { reason };
                Err(e)
            },
        }
    }

    /// Tear down and run a fresh initialization with full
    /// re-enumeration, from any state.
    pub fn reinitialize(&self) -> Result<u32> {
        {
            let mut inner = self.inner.write();
            self.backend.shutdown();
            inner.state = AdapterState::Uninitialized;
            inner.devices.clear();
        }
        self.initialize()
    }

    /// Device count of a healthy interface; the structured no-data
    /// errors otherwise.
    pub fn device_count(&self) -> Result<u32> {
        match &self.inner.read().state {
            AdapterState::Healthy { device_count } => Ok(*device_count),
            AdapterState::Uninitialized => Err(Error::Uninitialized),
            AdapterState::Degraded { reason } => Err(Error::degraded(reason.clone())),
        }
    }

    /// Devices discovered at the last successful initialization
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.inner.read().devices.clone()
    }

    pub fn state(&self) -> AdapterState {
        self.inner.read().state.clone()
    }

    /// Release interface resources. Idempotent; cleanup errors are
    /// swallowed since teardown has no caller able to act on them.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        self.backend.shutdown();
        if inner.state != AdapterState::Uninitialized {
            debug!("device adapter shut down");
        }
        inner.state = AdapterState::Uninitialized;
        inner.devices.clear();
    }

    pub(crate) fn backend(&self) -> Arc<dyn NvmlInterface> {
        Arc::clone(&self.backend)
    }

    fn enumerate(&self, device_count: u32) -> Vec<DeviceInfo> {
        (0..device_count)
            .map(|index| {
                let name = self.backend.device_name(index).unwrap_or_else(|e| {
                    debug!(index, error = %e, "device name unavailable");
                    "Unknown".to_string()
                });
                DeviceInfo { index, name }
            })
            .collect()
    }
}
