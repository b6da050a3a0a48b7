// CLASSIFICATION: COMMUNITY
// Filename: context.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

use std::mem;

use log::{debug, warn};

use super::driver::Driver;
use super::error::DriverError;
use super::types::{ContextFlags, ContextHandle, Device, RawContext};

/// Context created with `cuCtxCreate`, destroyed when dropped.
#[derive(Debug)]
pub struct Context {
    driver: Driver,
    raw: RawContext,
    device: Device,
}

impl Context {
    /// Create a context on `device`. The driver pushes it onto the calling
    /// thread's context stack.
    pub fn create(
        driver: &Driver,
        device: Device,
        flags: ContextFlags,
    ) -> Result<Self, DriverError> {
        let raw = driver.check(driver.api().ctx_create(flags.bits(), device.0))?;
        debug!("created context {:#x} on {}", raw, device);
        Ok(Self {
            driver: driver.clone(),
            raw,
            device,
        })
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle(self.raw)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Make this the calling thread's current context, replacing the top
    /// of its stack.
    pub fn set_current(&self) -> Result<(), DriverError> {
        self.driver.set_current_context(Some(self.handle()))
    }

    /// Whether this context is the calling thread's current context.
    pub fn is_current(&self) -> Result<bool, DriverError> {
        Ok(self.driver.current_context()? == Some(self.handle()))
    }

    /// Destroy now and report failure, instead of on drop.
    pub fn destroy(mut self) -> Result<(), DriverError> {
        let raw = mem::take(&mut self.raw);
        destroy_raw(&self.driver, raw)
    }
}

fn destroy_raw(driver: &Driver, raw: RawContext) -> Result<(), DriverError> {
    debug!("destroying context {:#x}", raw);
    driver.check(driver.api().ctx_destroy(raw))
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.raw == 0 {
            return;
        }
        if let Err(e) = destroy_raw(&self.driver, self.raw) {
            warn!("failed to destroy context {:#x}: {}", self.raw, e);
        }
    }
}

/// Reference on a device's primary context, released when dropped.
#[derive(Debug)]
pub struct PrimaryContext {
    driver: Driver,
    raw: RawContext,
    device: Device,
    released: bool,
}

impl PrimaryContext {
    pub(crate) fn retain(driver: &Driver, device: Device) -> Result<Self, DriverError> {
        let raw = driver.check(driver.api().device_primary_ctx_retain(device.0))?;
        debug!("retained primary context {:#x} of {}", raw, device);
        Ok(Self {
            driver: driver.clone(),
            raw,
            device,
            released: false,
        })
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle(self.raw)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Primary contexts are not current until bound explicitly.
    pub fn set_current(&self) -> Result<(), DriverError> {
        self.driver.set_current_context(Some(self.handle()))
    }

    /// Release now and report failure, instead of on drop.
    pub fn release(mut self) -> Result<(), DriverError> {
        self.released = true;
        self.driver.primary_context_release(self.device)
    }
}

impl Drop for PrimaryContext {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.driver.primary_context_release(self.device) {
            warn!("failed to release primary context of {}: {}", self.device, e);
        }
    }
}
