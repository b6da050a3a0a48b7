// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! In-process stand-in for the CUDA driver.
//!
//! Keeps the bookkeeping the real driver keeps (initialisation, per-thread
//! current context, primary context reference counts, loaded modules, link
//! sessions) and returns the same result codes for the same misuse. Module
//! images are PTX text; kernels are recorded, never executed.

mod ptx;

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use log::debug;

use super::api::{CuResult, DriverApi};
use super::error;
use super::launch::{CU_LAUNCH_PARAM_BUFFER_POINTER, CU_LAUNCH_PARAM_BUFFER_SIZE};
use super::types::{
    attribute, status::*, ContextFlags, CUresult, Dim3, JitInputType, RawContext, RawDevice,
    RawDeviceptr, RawFunction, RawLinkState, RawModule, RawStream,
};

const MAX_THREADS_PER_BLOCK: u64 = 1024;
const DRIVER_VERSION: i32 = 12040;

/// One kernel launch observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub function: RawFunction,
    pub name: String,
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: u32,
    pub stream: RawStream,
    pub param_count: usize,
    /// Size of the packed argument buffer when launched through `extra`.
    pub extra_buffer_bytes: Option<usize>,
}

struct MockContext {
    device: RawDevice,
    primary: bool,
}

struct MockModule {
    context: RawContext,
    functions: HashMap<String, RawFunction>,
    globals: HashMap<String, (RawDeviceptr, usize)>,
}

struct MockLink {
    inputs: Vec<(JitInputType, String, String)>,
}

struct MockState {
    initialized: bool,
    device_count: i32,
    compute_capability: (i32, i32),
    next_handle: usize,
    next_devptr: RawDeviceptr,
    contexts: HashMap<RawContext, MockContext>,
    primary: HashMap<RawDevice, (RawContext, u32)>,
    /// Per-thread context stack; the last entry is current.
    stacks: HashMap<ThreadId, Vec<RawContext>>,
    modules: HashMap<RawModule, MockModule>,
    functions: HashMap<RawFunction, (RawModule, String)>,
    links: HashMap<RawLinkState, MockLink>,
    launches: Vec<LaunchRecord>,
}

impl MockState {
    fn handle(&mut self) -> usize {
        self.next_handle += 0x100;
        self.next_handle
    }

    fn alloc(&mut self, bytes: usize) -> CuResult<RawDeviceptr> {
        let ptr = self.next_devptr;
        let rounded = (bytes.max(1) as u64)
            .checked_add(0xff)
            .ok_or(CUDA_ERROR_OUT_OF_MEMORY)?
            & !0xff;
        self.next_devptr = ptr.checked_add(rounded).ok_or(CUDA_ERROR_OUT_OF_MEMORY)?;
        Ok(ptr)
    }

    fn ensure_init(&self) -> CuResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CUDA_ERROR_NOT_INITIALIZED)
        }
    }

    fn ensure_device(&self, dev: RawDevice) -> CuResult<()> {
        self.ensure_init()?;
        if (0..self.device_count).contains(&dev) {
            Ok(())
        } else {
            Err(CUDA_ERROR_INVALID_DEVICE)
        }
    }

    fn stack_top(&self) -> Option<RawContext> {
        self.stacks
            .get(&thread::current().id())
            .and_then(|stack| stack.last())
            .copied()
    }

    /// Live context current on the calling thread. A handle destroyed
    /// while bound here stays on the stack but can no longer be used.
    fn current_context(&self) -> CuResult<RawContext> {
        self.ensure_init()?;
        let ctx = self.stack_top().ok_or(CUDA_ERROR_INVALID_CONTEXT)?;
        if self.contexts.contains_key(&ctx) {
            Ok(ctx)
        } else {
            Err(CUDA_ERROR_CONTEXT_IS_DESTROYED)
        }
    }

    fn drop_context(&mut self, ctx: RawContext) {
        self.contexts.remove(&ctx);
        let modules: Vec<RawModule> = self
            .modules
            .iter()
            .filter(|(_, m)| m.context == ctx)
            .map(|(h, _)| *h)
            .collect();
        for module in modules {
            self.drop_module(module);
        }
    }

    fn drop_module(&mut self, module: RawModule) -> bool {
        let removed = self.modules.remove(&module).is_some();
        self.functions.retain(|_, (m, _)| *m != module);
        removed
    }

    fn load_image(&mut self, image: &[u8]) -> CuResult<RawModule> {
        let context = self.current_context()?;
        let text = image_text(image).ok_or(CUDA_ERROR_INVALID_IMAGE)?;
        if !ptx::is_valid(text) {
            return Err(CUDA_ERROR_INVALID_IMAGE);
        }
        let symbols = ptx::parse(text);
        let mut globals = HashMap::new();
        for (name, bytes) in symbols.globals {
            let ptr = self.alloc(bytes)?;
            globals.insert(name, (ptr, bytes));
        }
        let module = self.handle();
        let mut functions = HashMap::new();
        for entry in symbols.entries {
            let func = self.handle();
            self.functions.insert(func, (module, entry.clone()));
            functions.insert(entry, func);
        }
        self.modules.insert(
            module,
            MockModule {
                context,
                functions,
                globals,
            },
        );
        debug!("mock: loaded module {:#x}", module);
        Ok(module)
    }
}

/// PTX text of an image, ignoring trailing NUL terminators.
fn image_text(image: &[u8]) -> Option<&str> {
    let end = image.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&image[..end]).ok().filter(|t| !t.trim().is_empty())
}

/// In-process driver implementing [`DriverApi`].
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// One device of compute capability 7.0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                initialized: false,
                device_count: 1,
                compute_capability: (7, 0),
                next_handle: 0x1000,
                next_devptr: 0x7f00_0000_0000,
                contexts: HashMap::new(),
                primary: HashMap::new(),
                stacks: HashMap::new(),
                modules: HashMap::new(),
                functions: HashMap::new(),
                links: HashMap::new(),
                launches: Vec::new(),
            }),
        }
    }

    pub fn with_devices(self, count: i32) -> Self {
        self.lock().device_count = count.max(0);
        self
    }

    pub fn with_compute_capability(self, major: i32, minor: i32) -> Self {
        self.lock().compute_capability = (major, minor);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launches recorded so far, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.lock().launches.clone()
    }

    /// Contexts alive in the driver, primary contexts included.
    pub fn live_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn live_modules(&self) -> usize {
        self.lock().modules.len()
    }

    pub fn live_link_states(&self) -> usize {
        self.lock().links.len()
    }

    /// Retain count of a device's primary context.
    pub fn primary_refcount(&self, dev: RawDevice) -> u32 {
        self.lock().primary.get(&dev).map_or(0, |(_, n)| *n)
    }
}

impl DriverApi for MockDriver {
    fn init(&self, flags: u32) -> CuResult<()> {
        if flags != 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let mut st = self.lock();
        if st.device_count == 0 {
            return Err(CUDA_ERROR_NO_DEVICE);
        }
        st.initialized = true;
        Ok(())
    }

    fn driver_version(&self) -> CuResult<i32> {
        Ok(DRIVER_VERSION)
    }

    fn device_get_count(&self) -> CuResult<i32> {
        let st = self.lock();
        st.ensure_init()?;
        Ok(st.device_count)
    }

    fn device_get(&self, ordinal: i32) -> CuResult<RawDevice> {
        self.lock().ensure_device(ordinal)?;
        Ok(ordinal)
    }

    fn device_get_attribute(&self, attrib: i32, dev: RawDevice) -> CuResult<i32> {
        let st = self.lock();
        st.ensure_device(dev)?;
        match attrib {
            attribute::COMPUTE_CAPABILITY_MAJOR => Ok(st.compute_capability.0),
            attribute::COMPUTE_CAPABILITY_MINOR => Ok(st.compute_capability.1),
            attribute::MAX_THREADS_PER_BLOCK => Ok(MAX_THREADS_PER_BLOCK as i32),
            attribute::MULTIPROCESSOR_COUNT => Ok(80),
            _ => Err(CUDA_ERROR_INVALID_VALUE),
        }
    }

    fn device_primary_ctx_retain(&self, dev: RawDevice) -> CuResult<RawContext> {
        let mut st = self.lock();
        st.ensure_device(dev)?;
        if let Some((ctx, count)) = st.primary.get_mut(&dev) {
            *count += 1;
            return Ok(*ctx);
        }
        let ctx = st.handle();
        st.contexts.insert(ctx, MockContext { device: dev, primary: true });
        st.primary.insert(dev, (ctx, 1));
        Ok(ctx)
    }

    fn device_primary_ctx_release(&self, dev: RawDevice) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_device(dev)?;
        let (ctx, count) = st.primary.get(&dev).copied().ok_or(CUDA_ERROR_INVALID_CONTEXT)?;
        if count > 1 {
            st.primary.insert(dev, (ctx, count - 1));
        } else {
            st.primary.remove(&dev);
            st.drop_context(ctx);
        }
        Ok(())
    }

    fn ctx_get_current(&self) -> CuResult<RawContext> {
        let st = self.lock();
        st.ensure_init()?;
        Ok(st.stack_top().unwrap_or(0))
    }

    fn ctx_set_current(&self, ctx: RawContext) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_init()?;
        if ctx != 0 && !st.contexts.contains_key(&ctx) {
            return Err(CUDA_ERROR_INVALID_CONTEXT);
        }
        let stack = st.stacks.entry(thread::current().id()).or_default();
        // Null pops; anything else replaces the top.
        stack.pop();
        if ctx != 0 {
            stack.push(ctx);
        }
        Ok(())
    }

    fn ctx_get_device(&self) -> CuResult<RawDevice> {
        let st = self.lock();
        let ctx = st.current_context()?;
        st.contexts
            .get(&ctx)
            .map(|c| c.device)
            .ok_or(CUDA_ERROR_INVALID_CONTEXT)
    }

    fn ctx_create(&self, flags: u32, dev: RawDevice) -> CuResult<RawContext> {
        let mut st = self.lock();
        st.ensure_device(dev)?;
        if ContextFlags::from_bits(flags).is_none() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let ctx = st.handle();
        st.contexts.insert(ctx, MockContext { device: dev, primary: false });
        st.stacks.entry(thread::current().id()).or_default().push(ctx);
        Ok(ctx)
    }

    fn ctx_destroy(&self, ctx: RawContext) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_init()?;
        match st.contexts.get(&ctx) {
            Some(c) if !c.primary => {
                debug!("mock: destroying context {:#x} on device {}", ctx, c.device);
                st.drop_context(ctx);
                if st.stack_top() == Some(ctx) {
                    if let Some(stack) = st.stacks.get_mut(&thread::current().id()) {
                        stack.pop();
                    }
                }
                Ok(())
            }
            _ => Err(CUDA_ERROR_INVALID_CONTEXT),
        }
    }

    fn link_create(&self) -> CuResult<RawLinkState> {
        let mut st = self.lock();
        st.current_context()?;
        let state = st.handle();
        st.links.insert(state, MockLink { inputs: Vec::new() });
        Ok(state)
    }

    fn link_add_data(
        &self,
        state: RawLinkState,
        kind: JitInputType,
        data: &[u8],
        name: &CStr,
    ) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_init()?;
        let link = st.links.get_mut(&state).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if data.is_empty() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let malformed = match kind {
            JitInputType::Ptx => CUDA_ERROR_INVALID_PTX,
            _ => CUDA_ERROR_INVALID_IMAGE,
        };
        let text = image_text(data).ok_or(malformed)?;
        if !ptx::is_valid(text) {
            return Err(malformed);
        }
        link.inputs.push((kind, name.to_string_lossy().into_owned(), text.to_string()));
        Ok(())
    }

    fn link_complete(&self, state: RawLinkState) -> CuResult<Vec<u8>> {
        let st = self.lock();
        st.ensure_init()?;
        let link = st.links.get(&state).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if link.inputs.is_empty() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let mut seen: Vec<String> = Vec::new();
        let mut image = String::new();
        for (kind, name, text) in &link.inputs {
            for entry in ptx::parse(text).entries {
                if seen.contains(&entry) {
                    debug!("mock: duplicate entry {} from {} input {}", entry, kind, name);
                    return Err(CUDA_ERROR_INVALID_IMAGE);
                }
                seen.push(entry);
            }
            image.push_str(text);
            image.push('\n');
        }
        Ok(image.into_bytes())
    }

    fn link_destroy(&self, state: RawLinkState) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_init()?;
        st.links.remove(&state).map(|_| ()).ok_or(CUDA_ERROR_INVALID_HANDLE)
    }

    fn module_load(&self, fname: &CStr) -> CuResult<RawModule> {
        let path = fname.to_str().map_err(|_| CUDA_ERROR_INVALID_VALUE)?;
        let mut st = self.lock();
        st.current_context()?;
        let image = std::fs::read(path).map_err(|_| CUDA_ERROR_FILE_NOT_FOUND)?;
        st.load_image(&image)
    }

    fn module_load_data(&self, image: &[u8]) -> CuResult<RawModule> {
        self.lock().load_image(image)
    }

    fn module_unload(&self, module: RawModule) -> CuResult<()> {
        let mut st = self.lock();
        st.ensure_init()?;
        if st.drop_module(module) {
            Ok(())
        } else {
            Err(CUDA_ERROR_INVALID_HANDLE)
        }
    }

    fn module_get_function(&self, module: RawModule, name: &CStr) -> CuResult<RawFunction> {
        let st = self.lock();
        st.ensure_init()?;
        let m = st.modules.get(&module).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        let name = name.to_str().map_err(|_| CUDA_ERROR_NOT_FOUND)?;
        m.functions.get(name).copied().ok_or(CUDA_ERROR_NOT_FOUND)
    }

    fn module_get_global(
        &self,
        module: RawModule,
        name: &CStr,
    ) -> CuResult<(RawDeviceptr, usize)> {
        let st = self.lock();
        st.ensure_init()?;
        let m = st.modules.get(&module).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        let name = name.to_str().map_err(|_| CUDA_ERROR_NOT_FOUND)?;
        m.globals.get(name).copied().ok_or(CUDA_ERROR_NOT_FOUND)
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
        let mut st = self.lock();
        let current = st.current_context()?;
        let (module, name) = st.functions.get(&func).cloned().ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if st.modules.get(&module).map(|m| m.context) != Some(current) {
            return Err(CUDA_ERROR_INVALID_CONTEXT);
        }
        if grid.volume() == 0 || block.volume() == 0 || block.volume() > MAX_THREADS_PER_BLOCK {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        if kernel_params.is_some() && extra.is_some() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let param_count = kernel_params.map_or(0, |p| p.len());
        let extra_buffer_bytes = match extra {
            Some(options) => Some(read_extra(options)?),
            None => None,
        };
        st.launches.push(LaunchRecord {
            function: func,
            name,
            grid,
            block,
            shared_mem_bytes,
            stream,
            param_count,
            extra_buffer_bytes,
        });
        Ok(())
    }

    fn error_name(&self, code: CUresult) -> Option<String> {
        Some(error::error_name(code).to_string())
    }

    fn error_string(&self, code: CUresult) -> Option<String> {
        Some(error::error_string(code).to_string())
    }
}

/// Walk a `CU_LAUNCH_PARAM_END` terminated option list and return the
/// argument buffer size it declares.
///
/// # Safety
/// A `CU_LAUNCH_PARAM_BUFFER_SIZE` value must point at a live `usize`.
unsafe fn read_extra(options: &[*mut c_void]) -> CuResult<usize> {
    let mut buffer: Option<*mut c_void> = None;
    let mut size: Option<usize> = None;
    let mut i = 0;
    loop {
        let key = *options.get(i).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        if key.is_null() {
            break;
        }
        let value = *options.get(i + 1).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        if key == CU_LAUNCH_PARAM_BUFFER_POINTER {
            buffer = Some(value);
        } else if key == CU_LAUNCH_PARAM_BUFFER_SIZE {
            if value.is_null() {
                return Err(CUDA_ERROR_INVALID_VALUE);
            }
            size = Some(*(value as *const usize));
        } else {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        i += 2;
    }
    match (buffer, size) {
        (Some(ptr), Some(bytes)) if !ptr.is_null() || bytes == 0 => Ok(bytes),
        _ => Err(CUDA_ERROR_INVALID_VALUE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = ".version 7.0\n.target sm_70\n.visible .entry k() { ret; }\n";

    #[test]
    fn calls_before_init_fail() {
        let drv = MockDriver::new();
        assert_eq!(drv.device_get_count(), Err(CUDA_ERROR_NOT_INITIALIZED));
        assert_eq!(drv.driver_version(), Ok(DRIVER_VERSION));
        drv.init(0).unwrap();
        assert_eq!(drv.device_get_count(), Ok(1));
    }

    #[test]
    fn no_devices_fails_init() {
        let drv = MockDriver::new().with_devices(0);
        assert_eq!(drv.init(0), Err(CUDA_ERROR_NO_DEVICE));
    }

    #[test]
    fn image_text_strips_terminator() {
        assert_eq!(image_text(b"abc\0\0"), Some("abc"));
        assert_eq!(image_text(b"\0"), None);
        assert_eq!(image_text(&[0xff, 0xfe]), None);
    }

    #[test]
    fn module_requires_current_context() {
        let drv = MockDriver::new();
        drv.init(0).unwrap();
        assert_eq!(
            drv.module_load_data(KERNEL.as_bytes()),
            Err(CUDA_ERROR_INVALID_CONTEXT)
        );
        drv.ctx_create(0, 0).unwrap();
        assert!(drv.module_load_data(KERNEL.as_bytes()).is_ok());
    }

    #[test]
    fn oversized_global_is_out_of_memory() {
        let drv = MockDriver::new();
        drv.init(0).unwrap();
        drv.ctx_create(0, 0).unwrap();
        let huge = ".version 7.0\n.target sm_70\n.global .b8 big[4294967296][4294967296];\n";
        assert_eq!(
            drv.module_load_data(huge.as_bytes()),
            Err(CUDA_ERROR_OUT_OF_MEMORY)
        );
        assert_eq!(drv.live_modules(), 0);
        assert!(drv.module_load_data(KERNEL.as_bytes()).is_ok());
    }

    #[test]
    fn alloc_rounds_and_refuses_wraparound() {
        let drv = MockDriver::new();
        let mut st = drv.lock();
        let a = st.alloc(4).unwrap();
        let b = st.alloc(1).unwrap();
        assert_eq!(b - a, 0x100);
        assert_eq!(st.alloc(usize::MAX), Err(CUDA_ERROR_OUT_OF_MEMORY));
        st.next_devptr = u64::MAX - 0x80;
        assert_eq!(st.alloc(1), Err(CUDA_ERROR_OUT_OF_MEMORY));
    }

    #[test]
    fn extra_list_must_be_terminated() {
        let mut size = 16usize;
        let mut buf = [0u8; 16];
        let opts = [
            CU_LAUNCH_PARAM_BUFFER_POINTER,
            buf.as_mut_ptr() as *mut c_void,
            CU_LAUNCH_PARAM_BUFFER_SIZE,
            &mut size as *mut usize as *mut c_void,
        ];
        assert_eq!(unsafe { read_extra(&opts) }, Err(CUDA_ERROR_INVALID_VALUE));
        let mut terminated = opts.to_vec();
        terminated.push(std::ptr::null_mut());
        assert_eq!(unsafe { read_extra(&terminated) }, Ok(16));
    }
}
