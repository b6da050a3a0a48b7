// CLASSIFICATION: COMMUNITY
// Filename: driver.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Entry point of the owned-handle layer.

use std::ffi::CString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::api::{CuResult, DriverApi};
use super::context::{Context, PrimaryContext};
use super::error::{self, CudaError, DriverError};
use super::library::DynamicDriver;
use super::link::LinkState;
use super::module::Module;
use super::types::{attribute, CUresult, ContextFlags, ContextHandle, Device};
use crate::config;

/// Driver version as reported by `cuDriverGetVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriverVersion {
    pub major: i32,
    pub minor: i32,
}

impl DriverVersion {
    pub fn from_raw(raw: i32) -> Self {
        Self {
            major: raw / 1000,
            minor: (raw % 1000) / 10,
        }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cloneable handle on a driver backend.
#[derive(Clone)]
pub struct Driver {
    api: Arc<dyn DriverApi>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

impl Driver {
    /// Open the vendor driver named by the global configuration and
    /// initialise it.
    pub fn load() -> Result<Self, CudaError> {
        let cfg = config::get_config().map_err(|e| CudaError::LibraryLoad(e.to_string()))?;
        let driver = Self::with_api(Arc::new(DynamicDriver::open(&cfg)?));
        driver.init(0)?;
        if let Ok(version) = driver.version() {
            info!("CUDA driver {} initialised", version);
        }
        Ok(driver)
    }

    /// Wrap an arbitrary backend, e.g. [`MockDriver`](super::MockDriver).
    /// The backend is not initialised.
    pub fn with_api(api: Arc<dyn DriverApi>) -> Self {
        Self { api }
    }

    /// The raw call surface.
    pub fn api(&self) -> &dyn DriverApi {
        self.api.as_ref()
    }

    /// Turn a raw result into a [`DriverError`] carrying the driver's own
    /// name and description for the code.
    pub fn check<T>(&self, res: CuResult<T>) -> Result<T, DriverError> {
        res.map_err(|code| self.error(code))
    }

    pub fn error(&self, code: CUresult) -> DriverError {
        let name = self
            .api
            .error_name(code)
            .unwrap_or_else(|| error::error_name(code).to_string());
        let message = self
            .api
            .error_string(code)
            .unwrap_or_else(|| error::error_string(code).to_string());
        DriverError::new(code, name, message)
    }

    pub fn init(&self, flags: u32) -> Result<(), DriverError> {
        self.check(self.api.init(flags))
    }

    pub fn version(&self) -> Result<DriverVersion, DriverError> {
        self.check(self.api.driver_version()).map(DriverVersion::from_raw)
    }

    pub fn device_count(&self) -> Result<i32, DriverError> {
        self.check(self.api.device_get_count())
    }

    pub fn device(&self, ordinal: i32) -> Result<Device, DriverError> {
        self.check(self.api.device_get(ordinal)).map(Device)
    }

    pub fn devices(&self) -> Result<Vec<Device>, DriverError> {
        (0..self.device_count()?).map(|i| self.device(i)).collect()
    }

    pub fn device_attribute(&self, device: Device, attrib: i32) -> Result<i32, DriverError> {
        self.check(self.api.device_get_attribute(attrib, device.0))
    }

    /// `(major, minor)` compute capability.
    pub fn compute_capability(&self, device: Device) -> Result<(i32, i32), DriverError> {
        let major = self.device_attribute(device, attribute::COMPUTE_CAPABILITY_MAJOR)?;
        let minor = self.device_attribute(device, attribute::COMPUTE_CAPABILITY_MINOR)?;
        Ok((major, minor))
    }

    /// Retain the device's primary context; released when the guard drops.
    pub fn retain_primary_context(&self, device: Device) -> Result<PrimaryContext, DriverError> {
        PrimaryContext::retain(self, device)
    }

    /// Release one reference on the device's primary context.
    pub fn primary_context_release(&self, device: Device) -> Result<(), DriverError> {
        debug!("releasing primary context of {}", device);
        self.check(self.api.device_primary_ctx_release(device.0))
    }

    /// Context bound to the calling thread, if any.
    pub fn current_context(&self) -> Result<Option<ContextHandle>, DriverError> {
        let raw = self.check(self.api.ctx_get_current())?;
        Ok((raw != 0).then_some(ContextHandle(raw)))
    }

    /// Replace the top of the calling thread's context stack with `ctx`.
    /// `None` pops the stack, exposing the context below it.
    pub fn set_current_context(&self, ctx: Option<ContextHandle>) -> Result<(), DriverError> {
        self.check(self.api.ctx_set_current(ctx.map_or(0, |c| c.0)))
    }

    /// Device of the current context.
    pub fn current_device(&self) -> Result<Device, DriverError> {
        self.check(self.api.ctx_get_device()).map(Device)
    }

    /// Create a context on `device` and push it onto this thread's stack.
    pub fn create_context(
        &self,
        device: Device,
        flags: ContextFlags,
    ) -> Result<Context, DriverError> {
        Context::create(self, device, flags)
    }

    /// Start a JIT link session.
    pub fn link(&self) -> Result<LinkState, DriverError> {
        LinkState::create(self)
    }

    /// Load a module from a cubin, PTX or fatbinary file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<Module, CudaError> {
        Module::load(self, path)
    }

    /// Load a module from an in-memory image.
    pub fn load_module_data(&self, image: &[u8]) -> Result<Module, DriverError> {
        Module::load_data(self, image)
    }
}

/// `&str` to a NUL terminated name for the driver.
pub(crate) fn c_name(name: &str) -> Result<CString, CudaError> {
    CString::new(name).map_err(|_| CudaError::InvalidName(name.to_string()))
}
