// CLASSIFICATION: COMMUNITY
// Filename: link.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! JIT link sessions: add inputs, complete into one image, destroy.

use std::mem;

use log::{debug, warn};

use super::driver::{c_name, Driver};
use super::error::{CudaError, DriverError};
use super::types::{JitInputType, RawLinkState};

/// `CUlinkState` owned by this process; destroyed when dropped.
#[derive(Debug)]
pub struct LinkState {
    driver: Driver,
    raw: RawLinkState,
    inputs: usize,
}

impl LinkState {
    /// Requires a current context.
    pub fn create(driver: &Driver) -> Result<Self, DriverError> {
        let raw = driver.check(driver.api().link_create())?;
        debug!("created link state {:#x}", raw);
        Ok(Self {
            driver: driver.clone(),
            raw,
            inputs: 0,
        })
    }

    /// Add one input blob under `name`, which the driver uses in its
    /// diagnostics. PTX is NUL terminated before being handed over.
    pub fn add_data(
        &mut self,
        kind: JitInputType,
        data: &[u8],
        name: &str,
    ) -> Result<(), CudaError> {
        let name = c_name(name)?;
        let res = if kind == JitInputType::Ptx && data.last() != Some(&0) {
            let mut owned = Vec::with_capacity(data.len() + 1);
            owned.extend_from_slice(data);
            owned.push(0);
            self.driver.api().link_add_data(self.raw, kind, &owned, &name)
        } else {
            self.driver.api().link_add_data(self.raw, kind, data, &name)
        };
        self.driver.check(res)?;
        self.inputs += 1;
        debug!("link {:#x}: added {} input {:?}", self.raw, kind, name);
        Ok(())
    }

    /// Add PTX source text.
    pub fn add_ptx(&mut self, ptx: &str, name: &str) -> Result<(), CudaError> {
        self.add_data(JitInputType::Ptx, ptx.as_bytes(), name)
    }

    /// Number of inputs accepted so far.
    pub fn input_count(&self) -> usize {
        self.inputs
    }

    /// Finish linking and return a copy of the linked image.
    pub fn complete(&mut self) -> Result<Vec<u8>, DriverError> {
        let image = self.driver.check(self.driver.api().link_complete(self.raw))?;
        debug!("link {:#x}: completed {} byte image", self.raw, image.len());
        Ok(image)
    }

    /// Destroy now and report failure, instead of on drop.
    pub fn destroy(mut self) -> Result<(), DriverError> {
        let raw = mem::take(&mut self.raw);
        self.driver.check(self.driver.api().link_destroy(raw))
    }
}

impl Drop for LinkState {
    fn drop(&mut self) {
        if self.raw == 0 {
            return;
        }
        if let Err(e) = self.driver.check(self.driver.api().link_destroy(self.raw)) {
            warn!("failed to destroy link state {:#x}: {}", self.raw, e);
        }
    }
}
