// CLASSIFICATION: COMMUNITY
// Filename: types.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Handle types, result codes and enumerations shared by every driver
//! backend. Pointer-shaped driver handles travel as `usize`, device
//! addresses as `u64`.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

/// Native `CUresult`.
pub type CUresult = i32;

/// Raw `CUdevice`.
pub type RawDevice = i32;
/// Raw `CUcontext`.
pub type RawContext = usize;
/// Raw `CUmodule`.
pub type RawModule = usize;
/// Raw `CUfunction`.
pub type RawFunction = usize;
/// Raw `CUstream`.
pub type RawStream = usize;
/// Raw `CUevent`.
pub type RawEvent = usize;
/// Raw `CUlinkState`.
pub type RawLinkState = usize;
/// Raw `CUdeviceptr`.
pub type RawDeviceptr = u64;

/// Driver result codes used by this crate.
pub mod status {
    use super::CUresult;

    pub const CUDA_SUCCESS: CUresult = 0;
    pub const CUDA_ERROR_INVALID_VALUE: CUresult = 1;
    pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
    pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;
    pub const CUDA_ERROR_DEINITIALIZED: CUresult = 4;
    pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;
    pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;
    pub const CUDA_ERROR_INVALID_IMAGE: CUresult = 200;
    pub const CUDA_ERROR_INVALID_CONTEXT: CUresult = 201;
    pub const CUDA_ERROR_NO_BINARY_FOR_GPU: CUresult = 209;
    pub const CUDA_ERROR_INVALID_PTX: CUresult = 218;
    pub const CUDA_ERROR_JIT_COMPILER_NOT_FOUND: CUresult = 221;
    pub const CUDA_ERROR_INVALID_SOURCE: CUresult = 300;
    pub const CUDA_ERROR_FILE_NOT_FOUND: CUresult = 301;
    pub const CUDA_ERROR_SHARED_OBJECT_SYMBOL_NOT_FOUND: CUresult = 302;
    pub const CUDA_ERROR_INVALID_HANDLE: CUresult = 400;
    pub const CUDA_ERROR_NOT_FOUND: CUresult = 500;
    pub const CUDA_ERROR_NOT_READY: CUresult = 600;
    pub const CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES: CUresult = 701;
    pub const CUDA_ERROR_LAUNCH_TIMEOUT: CUresult = 702;
    pub const CUDA_ERROR_PRIMARY_CONTEXT_ACTIVE: CUresult = 708;
    pub const CUDA_ERROR_CONTEXT_IS_DESTROYED: CUresult = 709;
    pub const CUDA_ERROR_LAUNCH_FAILED: CUresult = 719;
    pub const CUDA_ERROR_NOT_SUPPORTED: CUresult = 801;
    pub const CUDA_ERROR_UNKNOWN: CUresult = 999;
}

/// `CUdevice_attribute` values queried by this crate.
pub mod attribute {
    pub const MAX_THREADS_PER_BLOCK: i32 = 1;
    pub const MULTIPROCESSOR_COUNT: i32 = 16;
    pub const COMPUTE_CAPABILITY_MAJOR: i32 = 75;
    pub const COMPUTE_CAPABILITY_MINOR: i32 = 76;
}

/// Device ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Device(pub(crate) RawDevice);

impl Device {
    /// Wrap a raw `CUdevice` value obtained elsewhere.
    pub fn from_raw(raw: RawDevice) -> Self {
        Device(raw)
    }

    pub fn as_raw(self) -> RawDevice {
        self.0
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cuda:{}", self.0)
    }
}

/// Non-owning context handle, as returned by the current-context query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub(crate) RawContext);

impl ContextHandle {
    /// # Safety
    /// `raw` must be a context handle issued by the driver in use.
    pub unsafe fn from_raw(raw: RawContext) -> Self {
        ContextHandle(raw)
    }

    pub fn as_raw(self) -> RawContext {
        self.0
    }
}

/// Device memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DevicePtr(pub RawDeviceptr);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    pub fn offset(self, bytes: u64) -> DevicePtr {
        DevicePtr(self.0.wrapping_add(bytes))
    }
}

impl fmt::LowerHex for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Ordered execution queue. The null stream is the legacy default stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stream(RawStream);

impl Stream {
    pub const fn null() -> Self {
        Stream(0)
    }

    /// # Safety
    /// `raw` must be a stream created under the context that will launch on it.
    pub unsafe fn from_raw(raw: RawStream) -> Self {
        Stream(raw)
    }

    pub fn as_raw(self) -> RawStream {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Synchronisation point recorded on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(RawEvent);

impl Event {
    /// # Safety
    /// `raw` must be an event handle issued by the driver in use.
    pub unsafe fn from_raw(raw: RawEvent) -> Self {
        Event(raw)
    }

    pub fn as_raw(self) -> RawEvent {
        self.0
    }
}

/// Grid or block extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Total number of elements covered, widened so it cannot overflow.
    pub fn volume(self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Dim3::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Dim3::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Dim3::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Dim3::new(x, y, z)
    }
}

bitflags! {
    /// `CUctx_flags` accepted by context creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u32 {
        const SCHED_SPIN = 0x01;
        const SCHED_YIELD = 0x02;
        const SCHED_BLOCKING_SYNC = 0x04;
        const MAP_HOST = 0x08;
        const LMEM_RESIZE_TO_MAX = 0x10;
    }
}

/// Kind of input handed to a JIT link session (`CUjitInputType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum JitInputType {
    Cubin = 0,
    Ptx = 1,
    Fatbinary = 2,
    Object = 3,
    Library = 4,
}

impl JitInputType {
    pub const ALL: [JitInputType; 5] = [
        JitInputType::Cubin,
        JitInputType::Ptx,
        JitInputType::Fatbinary,
        JitInputType::Object,
        JitInputType::Library,
    ];

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            JitInputType::Cubin => "cubin",
            JitInputType::Ptx => "ptx",
            JitInputType::Fatbinary => "fatbin",
            JitInputType::Object => "object",
            JitInputType::Library => "library",
        }
    }

    /// Infer the input kind from a file extension, the way `nvlink` does.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "cubin" => Some(JitInputType::Cubin),
            "ptx" => Some(JitInputType::Ptx),
            "fatbin" => Some(JitInputType::Fatbinary),
            "o" | "obj" => Some(JitInputType::Object),
            "a" | "lib" => Some(JitInputType::Library),
            _ => None,
        }
    }
}

impl TryFrom<i32> for JitInputType {
    type Error = i32;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        JitInputType::ALL
            .into_iter()
            .find(|kind| kind.as_raw() == raw)
            .ok_or(raw)
    }
}

impl FromStr for JitInputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cubin" => Ok(JitInputType::Cubin),
            "ptx" => Ok(JitInputType::Ptx),
            "fatbin" | "fatbinary" => Ok(JitInputType::Fatbinary),
            "object" | "obj" => Ok(JitInputType::Object),
            "library" | "lib" => Ok(JitInputType::Library),
            other => Err(format!("unknown JIT input type: {other}")),
        }
    }
}

impl fmt::Display for JitInputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
