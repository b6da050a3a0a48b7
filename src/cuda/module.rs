// CLASSIFICATION: COMMUNITY
// Filename: module.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

use std::ffi::CString;
use std::mem;
use std::path::Path;

use log::{debug, warn};

use super::driver::{c_name, Driver};
use super::error::{CudaError, DriverError};
use super::launch::{self, ArgBuffer, KernelArgs, LaunchConfig};
use super::types::{status::*, ContextHandle, DevicePtr, RawFunction, RawModule};

/// Loaded module, unloaded when dropped.
///
/// Loading requires a current context and the module belongs to that
/// context. Destroying the context unloads the module with it, so drop or
/// [`unload`](Module::unload) modules before destroying their context.
/// Dropping a module whose context is already gone is harmless.
#[derive(Debug)]
pub struct Module {
    driver: Driver,
    raw: RawModule,
    context: Option<ContextHandle>,
}

/// Module-scope device variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Global {
    pub ptr: DevicePtr,
    pub bytes: usize,
}

impl Module {
    /// `cuModuleLoad`: cubin, PTX or fatbinary file.
    pub fn load(driver: &Driver, path: impl AsRef<Path>) -> Result<Self, CudaError> {
        let path = path.as_ref();
        let fname = path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| CudaError::InvalidPath(path.to_path_buf()))?;
        let context = driver.current_context()?;
        let raw = driver.check(driver.api().module_load(&fname))?;
        debug!("loaded module {:#x} from {}", raw, path.display());
        Ok(Self {
            driver: driver.clone(),
            raw,
            context,
        })
    }

    /// `cuModuleLoadData`: in-memory image.
    pub fn load_data(driver: &Driver, image: &[u8]) -> Result<Self, DriverError> {
        let context = driver.current_context()?;
        let raw = driver.check(driver.api().module_load_data(image))?;
        debug!("loaded module {:#x} from {} byte image", raw, image.len());
        Ok(Self {
            driver: driver.clone(),
            raw,
            context,
        })
    }

    pub fn as_raw(&self) -> RawModule {
        self.raw
    }

    /// Context that was current when the module was loaded.
    pub fn context(&self) -> Option<ContextHandle> {
        self.context
    }

    /// Resolve a kernel entry point. Fails with `CUDA_ERROR_NOT_FOUND` when
    /// the module has no such kernel.
    pub fn function(&self, name: &str) -> Result<Function<'_>, CudaError> {
        let c = c_name(name)?;
        let raw = self
            .driver
            .check(self.driver.api().module_get_function(self.raw, &c))?;
        Ok(Function {
            module: self,
            raw,
            name: name.to_string(),
        })
    }

    /// Resolve a module-scope variable. Fails with `CUDA_ERROR_NOT_FOUND`
    /// when the module has no such variable.
    pub fn global(&self, name: &str) -> Result<Global, CudaError> {
        let c = c_name(name)?;
        let (ptr, bytes) = self
            .driver
            .check(self.driver.api().module_get_global(self.raw, &c))?;
        Ok(Global {
            ptr: DevicePtr(ptr),
            bytes,
        })
    }

    /// Unload now and report failure, instead of on drop.
    pub fn unload(mut self) -> Result<(), DriverError> {
        let raw = mem::take(&mut self.raw);
        self.driver.check(self.driver.api().module_unload(raw))
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if self.raw == 0 {
            return;
        }
        match self.driver.api().module_unload(self.raw) {
            Ok(()) => {}
            // Went away with its context.
            Err(CUDA_ERROR_INVALID_HANDLE | CUDA_ERROR_CONTEXT_IS_DESTROYED) => {
                debug!("module {:#x} already unloaded with its context", self.raw);
            }
            Err(code) => {
                let e = self.driver.error(code);
                warn!("failed to unload module {:#x}: {}", self.raw, e);
            }
        }
    }
}

/// Kernel entry point borrowed from its [`Module`].
#[derive(Debug, Clone)]
pub struct Function<'m> {
    module: &'m Module,
    raw: RawFunction,
    name: String,
}

impl<'m> Function<'m> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_raw(&self) -> RawFunction {
        self.raw
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    /// Launch with one pointer per argument (`kernelParams`).
    ///
    /// # Safety
    /// `args` must match the kernel's parameter list in count, order and
    /// layout, and every device pointer among them must be valid for the
    /// accesses the kernel performs.
    pub unsafe fn launch(
        &self,
        config: &LaunchConfig,
        args: &mut KernelArgs,
    ) -> Result<(), CudaError> {
        let params = if args.is_empty() {
            None
        } else {
            Some(args.as_params())
        };
        launch::launch(&self.module.driver, self.raw, config, params, None)
    }

    /// Launch with all arguments packed into one buffer (`extra`).
    ///
    /// # Safety
    /// As for [`Function::launch`], with `args` packed at the offsets the
    /// kernel expects.
    pub unsafe fn launch_packed(
        &self,
        config: &LaunchConfig,
        args: &mut ArgBuffer,
    ) -> Result<(), CudaError> {
        let extra = Some(args.as_extra());
        launch::launch(&self.module.driver, self.raw, config, None, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuda::types::status::*;
    use crate::cuda::{ContextFlags, MockDriver};
    use std::sync::Arc;

    const PTX: &str = r#"
.version 7.0
.target sm_70
.address_size 64
.visible .global .align 4 .u32 counter;
.visible .entry bump(.param .u64 p)
{
    ret;
}
"#;

    #[test]
    fn resolves_functions_and_globals() {
        let mock = Arc::new(MockDriver::new());
        let driver = Driver::with_api(mock.clone());
        driver.init(0).unwrap();
        let dev = driver.device(0).unwrap();
        let ctx = driver.create_context(dev, ContextFlags::empty()).unwrap();

        let module = driver.load_module_data(PTX.as_bytes()).unwrap();
        assert_eq!(module.context(), Some(ctx.handle()));
        let f = module.function("bump").unwrap();
        assert_eq!(f.name(), "bump");
        assert_eq!(module.global("counter").unwrap().bytes, 4);

        let missing = module.function("nope").unwrap_err();
        assert_eq!(missing.driver_code(), Some(CUDA_ERROR_NOT_FOUND));
        let missing = module.global("nope").unwrap_err();
        assert_eq!(missing.driver_code(), Some(CUDA_ERROR_NOT_FOUND));

        drop(f);
        module.unload().unwrap();
        assert_eq!(mock.live_modules(), 0);
    }

    #[test]
    fn module_outliving_its_context_drops_quietly() {
        let mock = Arc::new(MockDriver::new());
        let driver = Driver::with_api(mock.clone());
        driver.init(0).unwrap();
        let dev = driver.device(0).unwrap();
        let ctx = driver.create_context(dev, ContextFlags::empty()).unwrap();
        let module = driver.load_module_data(PTX.as_bytes()).unwrap();

        ctx.destroy().unwrap();
        assert_eq!(mock.live_modules(), 0);
        let err = driver.check(driver.api().module_unload(module.as_raw())).unwrap_err();
        assert_eq!(err.code(), CUDA_ERROR_INVALID_HANDLE);
        drop(module);
        assert_eq!(mock.live_contexts(), 0);
    }
}
