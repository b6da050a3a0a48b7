// CLASSIFICATION: COMMUNITY
// Filename: launch.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Kernel launch configuration and argument packing.
//!
//! Two ways of passing arguments are supported, matching `cuLaunchKernel`:
//! [`KernelArgs`] builds the `kernelParams` pointer array (one pointer per
//! argument) and [`ArgBuffer`] packs every argument into one buffer handed
//! over through the `extra` option list.

use std::ffi::c_void;
use std::{mem, ptr, slice};

use log::trace;

use super::driver::Driver;
use super::error::CudaError;
use super::types::{DevicePtr, Dim3, RawFunction, Stream};

/// Terminates an `extra` option list.
pub const CU_LAUNCH_PARAM_END: *mut c_void = ptr::null_mut();
/// Next value points at the packed argument buffer.
pub const CU_LAUNCH_PARAM_BUFFER_POINTER: *mut c_void = 1 as *mut c_void;
/// Next value points at a `usize` holding the buffer size.
pub const CU_LAUNCH_PARAM_BUFFER_SIZE: *mut c_void = 2 as *mut c_void;

/// Plain values that can be copied byte for byte into kernel parameter
/// space.
///
/// # Safety
/// Implementors must have no padding, no pointers into host memory, and an
/// alignment of at most 8.
pub unsafe trait KernelArg: Copy + 'static {}

macro_rules! kernel_arg {
    ($($t:ty),*) => {
        $(unsafe impl KernelArg for $t {})*
    };
}

kernel_arg!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, DevicePtr);

unsafe impl<T: KernelArg, const N: usize> KernelArg for [T; N] {}

fn value_bytes<T: KernelArg>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>()) }
}

/// Grid, block, dynamic shared memory and stream of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: u32,
    pub stream: Stream,
}

impl LaunchConfig {
    pub fn new(grid: impl Into<Dim3>, block: impl Into<Dim3>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
            shared_mem_bytes: 0,
            stream: Stream::null(),
        }
    }

    /// One-dimensional launch covering `elements` with `block_size` threads
    /// per block.
    pub fn for_elements(elements: u32, block_size: u32) -> Self {
        let block_size = block_size.max(1);
        let blocks = elements.div_ceil(block_size).max(1);
        Self::new(blocks, block_size)
    }

    pub fn shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem_bytes = bytes;
        self
    }

    pub fn stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }
}

/// Arguments passed through `kernelParams`, each in its own 8-byte aligned
/// slot.
#[derive(Debug, Default)]
pub struct KernelArgs {
    slots: Vec<Box<[u64]>>,
    sizes: Vec<usize>,
    ptrs: Vec<*mut c_void>,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: KernelArg>(&mut self, value: T) -> &mut Self {
        self.push_bytes(value_bytes(&value))
    }

    /// Raw bytes of one argument, e.g. a by-value struct.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let words = ((bytes.len() + 7) / 8).max(1);
        let mut slot = vec![0u64; words].into_boxed_slice();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot.as_mut_ptr() as *mut u8, bytes.len());
        }
        self.slots.push(slot);
        self.sizes.push(bytes.len());
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Byte size of each argument, in order.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Bytes of argument `index`.
    pub fn arg_bytes(&self, index: usize) -> Option<&[u8]> {
        let slot = self.slots.get(index)?;
        let len = self.sizes[index];
        Some(unsafe { slice::from_raw_parts(slot.as_ptr() as *const u8, len) })
    }

    /// Pointer array for `cuLaunchKernel`. Valid until `self` is mutated.
    pub fn as_params(&mut self) -> &mut [*mut c_void] {
        self.ptrs = self
            .slots
            .iter_mut()
            .map(|slot| slot.as_mut_ptr() as *mut c_void)
            .collect();
        &mut self.ptrs
    }
}

/// Arguments packed into one buffer at their natural alignment, passed
/// through the `extra` option list.
#[derive(Debug, Default)]
pub struct ArgBuffer {
    bytes: Vec<u8>,
    size: usize,
    options: Vec<*mut c_void>,
}

impl ArgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: KernelArg>(&mut self, value: T) -> &mut Self {
        let align = mem::align_of::<T>();
        let offset = (self.bytes.len() + align - 1) & !(align - 1);
        self.bytes.resize(offset, 0);
        self.bytes.extend_from_slice(value_bytes(&value));
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `CU_LAUNCH_PARAM_END` terminated option list pointing into `self`.
    pub fn as_extra(&mut self) -> &mut [*mut c_void] {
        self.size = self.bytes.len();
        self.options = vec![
            CU_LAUNCH_PARAM_BUFFER_POINTER,
            self.bytes.as_mut_ptr() as *mut c_void,
            CU_LAUNCH_PARAM_BUFFER_SIZE,
            &mut self.size as *mut usize as *mut c_void,
            CU_LAUNCH_PARAM_END,
        ];
        &mut self.options
    }
}

/// # Safety
/// See [`DriverApi::launch_kernel`](super::DriverApi::launch_kernel).
pub(crate) unsafe fn launch(
    driver: &Driver,
    func: RawFunction,
    config: &LaunchConfig,
    kernel_params: Option<&mut [*mut c_void]>,
    extra: Option<&mut [*mut c_void]>,
) -> Result<(), CudaError> {
    trace!(
        "launch {:#x} grid={:?} block={:?} shared={} stream={:#x}",
        func,
        config.grid,
        config.block,
        config.shared_mem_bytes,
        config.stream.as_raw()
    );
    let res = driver.api().launch_kernel(
        func,
        config.grid,
        config.block,
        config.shared_mem_bytes,
        config.stream.as_raw(),
        kernel_params,
        extra,
    );
    driver.check(res)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_args_keep_each_value() {
        let mut args = KernelArgs::new();
        args.push(7u32).push(DevicePtr(0xdead_beef)).push([1.0f32, 2.0]);
        assert_eq!(args.len(), 3);
        assert_eq!(args.sizes(), &[4, 8, 8]);
        assert_eq!(args.arg_bytes(0), Some(&7u32.to_ne_bytes()[..]));
        assert_eq!(args.arg_bytes(1), Some(&0xdead_beefu64.to_ne_bytes()[..]));
        let params = args.as_params();
        assert_eq!(params.len(), 3);
        let first = unsafe { *(params[0] as *const u32) };
        assert_eq!(first, 7);
    }

    #[test]
    fn arg_buffer_respects_alignment() {
        let mut buf = ArgBuffer::new();
        buf.push(1u8).push(2u32).push(3u16).push(4u64);
        // u8 @0, u32 @4, u16 @8, u64 @16
        assert_eq!(buf.len(), 24);
        assert_eq!(&buf.as_bytes()[4..8], &2u32.to_ne_bytes());
        assert_eq!(&buf.as_bytes()[16..24], &4u64.to_ne_bytes());
    }

    #[test]
    fn extra_list_layout() {
        let mut buf = ArgBuffer::new();
        buf.push(5i32);
        let extra = buf.as_extra();
        assert_eq!(extra.len(), 5);
        assert_eq!(extra[0], CU_LAUNCH_PARAM_BUFFER_POINTER);
        assert_eq!(extra[2], CU_LAUNCH_PARAM_BUFFER_SIZE);
        assert_eq!(unsafe { *(extra[3] as *const usize) }, 4);
        assert!(extra[4].is_null());
    }

    #[test]
    fn config_for_elements_rounds_up() {
        let cfg = LaunchConfig::for_elements(1000, 256);
        assert_eq!(cfg.grid, Dim3::new(4, 1, 1));
        assert_eq!(cfg.block, Dim3::new(256, 1, 1));
        assert_eq!(LaunchConfig::for_elements(0, 128).grid, Dim3::new(1, 1, 1));
        let cfg = LaunchConfig::new((2, 2), 32).shared_mem(512);
        assert_eq!(cfg.grid, Dim3::new(2, 2, 1));
        assert_eq!(cfg.shared_mem_bytes, 512);
        assert!(cfg.stream.is_null());
    }
}
