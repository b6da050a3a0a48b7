// CLASSIFICATION: COMMUNITY
// Filename: library.rs v0.9
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Runtime CUDA integration using dynamic loading of `libcuda`.
//! Every entry point is resolved once when the library is opened; a
//! missing required symbol fails the load instead of the first call.

use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::path::Path;
use std::ptr;

use libloading::{Library, Symbol};
use log::{debug, info, trace, warn};

use super::api::{CuResult, DriverApi};
use super::error::CudaError;
use super::types::{
    status::CUDA_SUCCESS, CUresult, Dim3, JitInputType, RawContext, RawDevice, RawDeviceptr,
    RawFunction, RawLinkState, RawModule, RawStream,
};
use crate::config::DriverConfig;

type CUcontext = *mut c_void;
type CUmodule = *mut c_void;
type CUfunction = *mut c_void;
type CUstream = *mut c_void;
type CUlinkState = *mut c_void;

type FnCuInit = unsafe extern "C" fn(c_uint) -> CUresult;
type FnCuDriverGetVersion = unsafe extern "C" fn(*mut c_int) -> CUresult;
type FnCuDeviceGetCount = unsafe extern "C" fn(*mut c_int) -> CUresult;
type FnCuDeviceGet = unsafe extern "C" fn(*mut RawDevice, c_int) -> CUresult;
type FnCuDeviceGetAttribute = unsafe extern "C" fn(*mut c_int, c_int, RawDevice) -> CUresult;
type FnCuDevicePrimaryCtxRetain = unsafe extern "C" fn(*mut CUcontext, RawDevice) -> CUresult;
type FnCuDevicePrimaryCtxRelease = unsafe extern "C" fn(RawDevice) -> CUresult;
type FnCuCtxGetCurrent = unsafe extern "C" fn(*mut CUcontext) -> CUresult;
type FnCuCtxSetCurrent = unsafe extern "C" fn(CUcontext) -> CUresult;
type FnCuCtxGetDevice = unsafe extern "C" fn(*mut RawDevice) -> CUresult;
type FnCuCtxCreate = unsafe extern "C" fn(*mut CUcontext, c_uint, RawDevice) -> CUresult;
type FnCuCtxDestroy = unsafe extern "C" fn(CUcontext) -> CUresult;
type FnCuLinkCreate =
    unsafe extern "C" fn(c_uint, *mut c_int, *mut *mut c_void, *mut CUlinkState) -> CUresult;
type FnCuLinkAddData = unsafe extern "C" fn(
    CUlinkState,
    c_int,
    *mut c_void,
    usize,
    *const c_char,
    c_uint,
    *mut c_int,
    *mut *mut c_void,
) -> CUresult;
type FnCuLinkComplete = unsafe extern "C" fn(CUlinkState, *mut *mut c_void, *mut usize) -> CUresult;
type FnCuLinkDestroy = unsafe extern "C" fn(CUlinkState) -> CUresult;
type FnCuModuleLoad = unsafe extern "C" fn(*mut CUmodule, *const c_char) -> CUresult;
type FnCuModuleLoadData = unsafe extern "C" fn(*mut CUmodule, *const c_void) -> CUresult;
type FnCuModuleUnload = unsafe extern "C" fn(CUmodule) -> CUresult;
type FnCuModuleGetFunction =
    unsafe extern "C" fn(*mut CUfunction, CUmodule, *const c_char) -> CUresult;
type FnCuModuleGetGlobal =
    unsafe extern "C" fn(*mut RawDeviceptr, *mut usize, CUmodule, *const c_char) -> CUresult;
type FnCuLaunchKernel = unsafe extern "C" fn(
    CUfunction,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    CUstream,
    *mut *mut c_void,
    *mut *mut c_void,
) -> CUresult;
type FnCuGetErrorText = unsafe extern "C" fn(CUresult, *mut *const c_char) -> CUresult;

/// Symbols resolved at load time. Versioned names come first.
static REQUIRED_SYMBOLS: &[&[&str]] = &[
    &["cuInit"],
    &["cuDriverGetVersion"],
    &["cuDeviceGetCount"],
    &["cuDeviceGet"],
    &["cuDeviceGetAttribute"],
    &["cuDevicePrimaryCtxRetain"],
    &["cuDevicePrimaryCtxRelease_v2", "cuDevicePrimaryCtxRelease"],
    &["cuCtxGetCurrent"],
    &["cuCtxSetCurrent"],
    &["cuCtxGetDevice"],
    &["cuCtxCreate_v2", "cuCtxCreate"],
    &["cuCtxDestroy_v2", "cuCtxDestroy"],
    &["cuLinkCreate_v2", "cuLinkCreate"],
    &["cuLinkAddData_v2", "cuLinkAddData"],
    &["cuLinkComplete"],
    &["cuLinkDestroy"],
    &["cuModuleLoad"],
    &["cuModuleLoadData"],
    &["cuModuleUnload"],
    &["cuModuleGetFunction"],
    &["cuModuleGetGlobal_v2", "cuModuleGetGlobal"],
    &["cuLaunchKernel"],
];

/// Wrapper around the vendor CUDA driver library.
pub struct DynamicDriver {
    cu_init: FnCuInit,
    cu_driver_get_version: FnCuDriverGetVersion,
    cu_device_get_count: FnCuDeviceGetCount,
    cu_device_get: FnCuDeviceGet,
    cu_device_get_attribute: FnCuDeviceGetAttribute,
    cu_device_primary_ctx_retain: FnCuDevicePrimaryCtxRetain,
    cu_device_primary_ctx_release: FnCuDevicePrimaryCtxRelease,
    cu_ctx_get_current: FnCuCtxGetCurrent,
    cu_ctx_set_current: FnCuCtxSetCurrent,
    cu_ctx_get_device: FnCuCtxGetDevice,
    cu_ctx_create: FnCuCtxCreate,
    cu_ctx_destroy: FnCuCtxDestroy,
    cu_link_create: FnCuLinkCreate,
    cu_link_add_data: FnCuLinkAddData,
    cu_link_complete: FnCuLinkComplete,
    cu_link_destroy: FnCuLinkDestroy,
    cu_module_load: FnCuModuleLoad,
    cu_module_load_data: FnCuModuleLoadData,
    cu_module_unload: FnCuModuleUnload,
    cu_module_get_function: FnCuModuleGetFunction,
    cu_module_get_global: FnCuModuleGetGlobal,
    cu_launch_kernel: FnCuLaunchKernel,
    cu_get_error_name: Option<FnCuGetErrorText>,
    cu_get_error_string: Option<FnCuGetErrorText>,
    // Keeps every function pointer above valid.
    _lib: Library,
}

macro_rules! ffi_call {
    ($name:literal, $call:expr) => {{
        trace!("ffi_enter {}", $name);
        #[allow(unused_unsafe)]
        let res: CUresult = unsafe { $call };
        trace!("ffi_exit {} -> {}", $name, res);
        res
    }};
}

fn check(res: CUresult) -> CuResult<()> {
    if res == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(res)
    }
}

impl DynamicDriver {
    /// Open the driver named by `config`, or the platform default names.
    pub fn open(config: &DriverConfig) -> Result<Self, CudaError> {
        let mut last_err = String::from("no candidate library names");
        for candidate in config.library_candidates() {
            match Self::open_path(&candidate) {
                Ok(driver) => return Ok(driver),
                Err(CudaError::LibraryLoad(e)) => {
                    debug!("failed to load {}: {}", candidate.display(), e);
                    last_err = format!("{}: {}", candidate.display(), e);
                }
                Err(other) => return Err(other),
            }
        }
        warn!("CUDA driver library not found: {}", last_err);
        Err(CudaError::LibraryLoad(last_err))
    }

    /// Open a specific driver library file.
    pub fn open_path(path: &Path) -> Result<Self, CudaError> {
        let lib =
            unsafe { Library::new(path) }.map_err(|e| CudaError::LibraryLoad(e.to_string()))?;
        info!("loaded CUDA driver from {}", path.display());
        unsafe { Self::resolve_all(lib) }
    }

    unsafe fn resolve_all(lib: Library) -> Result<Self, CudaError> {
        // Field order below follows REQUIRED_SYMBOLS.
        let mut names = REQUIRED_SYMBOLS.iter().copied();
        macro_rules! next {
            () => {
                resolve(&lib, names.next().unwrap_or_default())?
            };
        }
        Ok(Self {
            cu_init: next!(),
            cu_driver_get_version: next!(),
            cu_device_get_count: next!(),
            cu_device_get: next!(),
            cu_device_get_attribute: next!(),
            cu_device_primary_ctx_retain: next!(),
            cu_device_primary_ctx_release: next!(),
            cu_ctx_get_current: next!(),
            cu_ctx_set_current: next!(),
            cu_ctx_get_device: next!(),
            cu_ctx_create: next!(),
            cu_ctx_destroy: next!(),
            cu_link_create: next!(),
            cu_link_add_data: next!(),
            cu_link_complete: next!(),
            cu_link_destroy: next!(),
            cu_module_load: next!(),
            cu_module_load_data: next!(),
            cu_module_unload: next!(),
            cu_module_get_function: next!(),
            cu_module_get_global: next!(),
            cu_launch_kernel: next!(),
            cu_get_error_name: resolve_opt(&lib, "cuGetErrorName"),
            cu_get_error_string: resolve_opt(&lib, "cuGetErrorString"),
            _lib: lib,
        })
    }

    fn error_text(f: Option<FnCuGetErrorText>, code: CUresult) -> Option<String> {
        let f = f?;
        let mut text: *const c_char = ptr::null();
        let res = unsafe { f(code, &mut text) };
        if res != CUDA_SUCCESS || text.is_null() {
            return None;
        }
        // Driver-owned static strings.
        Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
    }
}

unsafe fn resolve<F: Copy>(lib: &Library, names: &[&str]) -> Result<F, CudaError> {
    for (i, name) in names.iter().enumerate() {
        if let Ok(sym) = lib.get::<F>(name.as_bytes()) {
            if i > 0 {
                warn!("falling back to unversioned symbol {}", name);
            }
            let sym: Symbol<F> = sym;
            return Ok(*sym);
        }
    }
    Err(CudaError::MissingSymbol(names.join("/")))
}

unsafe fn resolve_opt<F: Copy>(lib: &Library, name: &str) -> Option<F> {
    lib.get::<F>(name.as_bytes()).ok().map(|s: Symbol<F>| *s)
}

/// The driver reads PTX images up to a terminating NUL.
fn nul_terminated(image: &[u8]) -> Cow<'_, [u8]> {
    if image.last() == Some(&0) {
        Cow::Borrowed(image)
    } else {
        let mut owned = Vec::with_capacity(image.len() + 1);
        owned.extend_from_slice(image);
        owned.push(0);
        Cow::Owned(owned)
    }
}

impl DriverApi for DynamicDriver {
    fn init(&self, flags: u32) -> CuResult<()> {
        check(ffi_call!("cuInit", (self.cu_init)(flags)))
    }

    fn driver_version(&self) -> CuResult<i32> {
        let mut version: c_int = 0;
        check(ffi_call!("cuDriverGetVersion", (self.cu_driver_get_version)(&mut version)))?;
        Ok(version)
    }

    fn device_get_count(&self) -> CuResult<i32> {
        let mut count: c_int = 0;
        check(ffi_call!("cuDeviceGetCount", (self.cu_device_get_count)(&mut count)))?;
        Ok(count)
    }

    fn device_get(&self, ordinal: i32) -> CuResult<RawDevice> {
        let mut dev: RawDevice = 0;
        check(ffi_call!("cuDeviceGet", (self.cu_device_get)(&mut dev, ordinal)))?;
        Ok(dev)
    }

    fn device_get_attribute(&self, attrib: i32, dev: RawDevice) -> CuResult<i32> {
        let mut value: c_int = 0;
        check(ffi_call!(
            "cuDeviceGetAttribute",
            (self.cu_device_get_attribute)(&mut value, attrib, dev)
        ))?;
        Ok(value)
    }

    fn device_primary_ctx_retain(&self, dev: RawDevice) -> CuResult<RawContext> {
        let mut ctx: CUcontext = ptr::null_mut();
        check(ffi_call!(
            "cuDevicePrimaryCtxRetain",
            (self.cu_device_primary_ctx_retain)(&mut ctx, dev)
        ))?;
        Ok(ctx as RawContext)
    }

    fn device_primary_ctx_release(&self, dev: RawDevice) -> CuResult<()> {
        check(ffi_call!(
            "cuDevicePrimaryCtxRelease",
            (self.cu_device_primary_ctx_release)(dev)
        ))
    }

    fn ctx_get_current(&self) -> CuResult<RawContext> {
        let mut ctx: CUcontext = ptr::null_mut();
        check(ffi_call!("cuCtxGetCurrent", (self.cu_ctx_get_current)(&mut ctx)))?;
        Ok(ctx as RawContext)
    }

    fn ctx_set_current(&self, ctx: RawContext) -> CuResult<()> {
        check(ffi_call!("cuCtxSetCurrent", (self.cu_ctx_set_current)(ctx as CUcontext)))
    }

    fn ctx_get_device(&self) -> CuResult<RawDevice> {
        let mut dev: RawDevice = 0;
        check(ffi_call!("cuCtxGetDevice", (self.cu_ctx_get_device)(&mut dev)))?;
        Ok(dev)
    }

    fn ctx_create(&self, flags: u32, dev: RawDevice) -> CuResult<RawContext> {
        let mut ctx: CUcontext = ptr::null_mut();
        check(ffi_call!("cuCtxCreate", (self.cu_ctx_create)(&mut ctx, flags, dev)))?;
        Ok(ctx as RawContext)
    }

    fn ctx_destroy(&self, ctx: RawContext) -> CuResult<()> {
        check(ffi_call!("cuCtxDestroy", (self.cu_ctx_destroy)(ctx as CUcontext)))
    }

    fn link_create(&self) -> CuResult<RawLinkState> {
        let mut state: CUlinkState = ptr::null_mut();
        check(ffi_call!(
            "cuLinkCreate",
            (self.cu_link_create)(0, ptr::null_mut(), ptr::null_mut(), &mut state)
        ))?;
        Ok(state as RawLinkState)
    }

    fn link_add_data(
        &self,
        state: RawLinkState,
        kind: JitInputType,
        data: &[u8],
        name: &CStr,
    ) -> CuResult<()> {
        check(ffi_call!(
            "cuLinkAddData",
            (self.cu_link_add_data)(
                state as CUlinkState,
                kind.as_raw(),
                data.as_ptr() as *mut c_void,
                data.len(),
                name.as_ptr(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        ))
    }

    fn link_complete(&self, state: RawLinkState) -> CuResult<Vec<u8>> {
        let mut cubin: *mut c_void = ptr::null_mut();
        let mut size: usize = 0;
        check(ffi_call!(
            "cuLinkComplete",
            (self.cu_link_complete)(state as CUlinkState, &mut cubin, &mut size)
        ))?;
        if cubin.is_null() {
            return Ok(Vec::new());
        }
        // The image lives until cuLinkDestroy; copy it out now.
        let image = unsafe { std::slice::from_raw_parts(cubin as *const u8, size) };
        Ok(image.to_vec())
    }

    fn link_destroy(&self, state: RawLinkState) -> CuResult<()> {
        check(ffi_call!("cuLinkDestroy", (self.cu_link_destroy)(state as CUlinkState)))
    }

    fn module_load(&self, fname: &CStr) -> CuResult<RawModule> {
        let mut module: CUmodule = ptr::null_mut();
        check(ffi_call!("cuModuleLoad", (self.cu_module_load)(&mut module, fname.as_ptr())))?;
        Ok(module as RawModule)
    }

    fn module_load_data(&self, image: &[u8]) -> CuResult<RawModule> {
        let image = nul_terminated(image);
        let mut module: CUmodule = ptr::null_mut();
        check(ffi_call!(
            "cuModuleLoadData",
            (self.cu_module_load_data)(&mut module, image.as_ptr() as *const c_void)
        ))?;
        Ok(module as RawModule)
    }

    fn module_unload(&self, module: RawModule) -> CuResult<()> {
        check(ffi_call!("cuModuleUnload", (self.cu_module_unload)(module as CUmodule)))
    }

    fn module_get_function(&self, module: RawModule, name: &CStr) -> CuResult<RawFunction> {
        let mut func: CUfunction = ptr::null_mut();
        check(ffi_call!(
            "cuModuleGetFunction",
            (self.cu_module_get_function)(&mut func, module as CUmodule, name.as_ptr())
        ))?;
        Ok(func as RawFunction)
    }

    fn module_get_global(
        &self,
        module: RawModule,
        name: &CStr,
    ) -> CuResult<(RawDeviceptr, usize)> {
        let mut dptr: RawDeviceptr = 0;
        let mut bytes: usize = 0;
        check(ffi_call!(
            "cuModuleGetGlobal",
            (self.cu_module_get_global)(&mut dptr, &mut bytes, module as CUmodule, name.as_ptr())
        ))?;
        Ok((dptr, bytes))
    }

    unsafe fn launch_kernel(
        &self,
        func: RawFunction,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        stream: RawStream,
        kernel_params: Option<&mut [*mut c_void]>,
        extra: Option<&mut [*mut c_void]>,
    ) -> CuResult<()> {
        let params = kernel_params.map_or(ptr::null_mut(), |p| p.as_mut_ptr());
        let extra = extra.map_or(ptr::null_mut(), |e| e.as_mut_ptr());
        check(ffi_call!(
            "cuLaunchKernel",
            (self.cu_launch_kernel)(
                func as CUfunction,
                grid.x,
                grid.y,
                grid.z,
                block.x,
                block.y,
                block.z,
                shared_mem_bytes,
                stream as CUstream,
                params,
                extra,
            )
        ))
    }

    fn error_name(&self, code: CUresult) -> Option<String> {
        Self::error_text(self.cu_get_error_name, code)
    }

    fn error_string(&self, code: CUresult) -> Option<String> {
        Self::error_text(self.cu_get_error_string, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn nul_terminated_appends_once() {
        assert_eq!(&*nul_terminated(b"abc"), b"abc\0");
        assert!(matches!(nul_terminated(b"abc\0"), Cow::Borrowed(_)));
    }

    #[test]
    fn missing_library_reports_load_error() {
        let cfg = DriverConfig {
            library_path: Some(PathBuf::from("/nonexistent/libcuda-missing.so")),
            ..DriverConfig::default()
        };
        match DynamicDriver::open(&cfg) {
            Err(CudaError::LibraryLoad(msg)) => assert!(msg.contains("libcuda-missing")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("library should not load"),
        }
    }

    #[test]
    fn symbol_table_covers_every_entry_point() {
        assert_eq!(REQUIRED_SYMBOLS.len(), 22);
        assert!(REQUIRED_SYMBOLS.iter().all(|names| !names.is_empty()));
    }

    #[test]
    fn exhausted_symbol_table_is_a_missing_symbol() {
        let lib = match unsafe { Library::new("libc.so.6") } {
            Ok(lib) => lib,
            Err(_) => return,
        };
        let res: Result<FnCuInit, CudaError> = unsafe { resolve(&lib, &[]) };
        assert!(matches!(res, Err(CudaError::MissingSymbol(name)) if name.is_empty()));
    }
}
