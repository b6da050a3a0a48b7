// CLASSIFICATION: COMMUNITY
// Filename: api.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! The driver call surface.
//!
//! Each method maps 1:1 onto a native driver entry point. Inputs and
//! failure modes are exactly those of the driver: a failing call returns
//! the raw `CUresult` untouched. Out-parameters become return values and
//! strings become `&CStr`; nothing else is translated.

use std::ffi::{c_void, CStr};

use super::types::{
    CUresult, Dim3, JitInputType, RawContext, RawDevice, RawDeviceptr, RawFunction,
    RawLinkState, RawModule, RawStream,
};

/// Result of a raw driver call.
pub type CuResult<T> = Result<T, CUresult>;

/// Backend implementing the CUDA driver entry points.
///
/// [`DynamicDriver`](super::DynamicDriver) forwards to the vendor library;
/// [`MockDriver`](super::MockDriver) keeps the same bookkeeping in process.
pub trait DriverApi: Send + Sync {
    /// `cuInit`
    fn init(&self, flags: u32) -> CuResult<()>;

    /// `cuDriverGetVersion`, encoded as `1000 * major + 10 * minor`.
    fn driver_version(&self) -> CuResult<i32>;

    /// `cuDeviceGetCount`
    fn device_get_count(&self) -> CuResult<i32>;

    /// `cuDeviceGet`
    fn device_get(&self, ordinal: i32) -> CuResult<RawDevice>;

    /// `cuDeviceGetAttribute`
    fn device_get_attribute(&self, attrib: i32, dev: RawDevice) -> CuResult<i32>;

    /// `cuDevicePrimaryCtxRetain`
    fn device_primary_ctx_retain(&self, dev: RawDevice) -> CuResult<RawContext>;

    /// `cuDevicePrimaryCtxRelease`
    fn device_primary_ctx_release(&self, dev: RawDevice) -> CuResult<()>;

    /// `cuCtxGetCurrent`; `0` when the calling thread has no current context.
    fn ctx_get_current(&self) -> CuResult<RawContext>;

    /// `cuCtxSetCurrent`. Replaces the top of the calling thread's context
    /// stack, or pushes onto an empty stack; `0` pops.
    fn ctx_set_current(&self, ctx: RawContext) -> CuResult<()>;

    /// `cuCtxGetDevice` for the current context.
    fn ctx_get_device(&self) -> CuResult<RawDevice>;

    /// `cuCtxCreate`; the new context is pushed onto the calling thread's stack.
    fn ctx_create(&self, flags: u32, dev: RawDevice) -> CuResult<RawContext>;

    /// `cuCtxDestroy`. Pops the context if it is current on the calling
    /// thread; other threads keep a handle that is now destroyed.
    fn ctx_destroy(&self, ctx: RawContext) -> CuResult<()>;

    /// `cuLinkCreate` with no JIT options.
    fn link_create(&self) -> CuResult<RawLinkState>;

    /// `cuLinkAddData`
    fn link_add_data(
        &self,
        state: RawLinkState,
        kind: JitInputType,
        data: &[u8],
        name: &CStr,
    ) -> CuResult<()>;

    /// `cuLinkComplete`. The image belongs to the link state in the driver,
    /// so it is copied out before returning.
    fn link_complete(&self, state: RawLinkState) -> CuResult<Vec<u8>>;

    /// `cuLinkDestroy`
    fn link_destroy(&self, state: RawLinkState) -> CuResult<()>;

    /// `cuModuleLoad`
    fn module_load(&self, fname: &CStr) -> CuResult<RawModule>;

    /// `cuModuleLoadData`
    fn module_load_data(&self, image: &[u8]) -> CuResult<RawModule>;

    /// `cuModuleUnload`
    fn module_unload(&self, module: RawModule) -> CuResult<()>;

    /// `cuModuleGetFunction`
    fn module_get_function(&self, module: RawModule, name: &CStr) -> CuResult<RawFunction>;

    /// `cuModuleGetGlobal`: device address and size in bytes.
    fn module_get_global(&self, module: RawModule, name: &CStr)
        -> CuResult<(RawDeviceptr, usize)>;

    /// `cuLaunchKernel`
    ///
    /// # Safety
    /// Every entry of `kernel_params` must point at a live value laid out as
    /// the kernel's matching parameter. `extra`, when given, must be a
    /// `CU_LAUNCH_PARAM_END` terminated option list whose pointers stay
    /// valid for the duration of the call.
    #[allow(clippy::too_many_arguments)]
    unsafe fn launch_kernel(
        &self,
        func: RawFunction,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        stream: RawStream,
        kernel_params: Option<&mut [*mut c_void]>,
        extra: Option<&mut [*mut c_void]>,
    ) -> CuResult<()>;

    /// `cuGetErrorName`
    fn error_name(&self, code: CUresult) -> Option<String>;

    /// `cuGetErrorString`
    fn error_string(&self, code: CUresult) -> Option<String>;
}
