// CLASSIFICATION: COMMUNITY
// Filename: library.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! NVRTC loaded at runtime, resolved the same way as the driver library.

use std::ffi::{c_char, c_int, CStr};
use std::path::Path;
use std::ptr;

use libloading::{Library, Symbol};
use log::{debug, info, trace, warn};

use super::status::{NVRTC_ERROR_INVALID_INPUT, NVRTC_SUCCESS};
use super::{NvResult, NvrtcApi, NvrtcError, NvrtcResult, RawProgram};
use crate::config::DriverConfig;

type NvrtcProgram = *mut std::ffi::c_void;

type FnVersion = unsafe extern "C" fn(*mut c_int, *mut c_int) -> NvrtcResult;
type FnCreateProgram = unsafe extern "C" fn(
    *mut NvrtcProgram,
    *const c_char,
    *const c_char,
    c_int,
    *const *const c_char,
    *const *const c_char,
) -> NvrtcResult;
type FnDestroyProgram = unsafe extern "C" fn(*mut NvrtcProgram) -> NvrtcResult;
type FnCompileProgram =
    unsafe extern "C" fn(NvrtcProgram, c_int, *const *const c_char) -> NvrtcResult;
type FnGetSize = unsafe extern "C" fn(NvrtcProgram, *mut usize) -> NvrtcResult;
type FnGetText = unsafe extern "C" fn(NvrtcProgram, *mut c_char) -> NvrtcResult;
type FnGetErrorString = unsafe extern "C" fn(NvrtcResult) -> *const c_char;
type FnGetNumSupportedArchs = unsafe extern "C" fn(*mut c_int) -> NvrtcResult;
type FnGetSupportedArchs = unsafe extern "C" fn(*mut c_int) -> NvrtcResult;

/// Wrapper around the vendor NVRTC library.
pub struct DynamicNvrtc {
    version: FnVersion,
    create_program: FnCreateProgram,
    destroy_program: FnDestroyProgram,
    compile_program: FnCompileProgram,
    get_ptx_size: FnGetSize,
    get_ptx: FnGetText,
    get_log_size: FnGetSize,
    get_log: FnGetText,
    get_error_string: Option<FnGetErrorString>,
    get_num_supported_archs: Option<FnGetNumSupportedArchs>,
    get_supported_archs: Option<FnGetSupportedArchs>,
    _lib: Library,
}

macro_rules! nvrtc_call {
    ($name:literal, $call:expr) => {{
        trace!("ffi_enter {}", $name);
        #[allow(unused_unsafe)]
        let res: NvrtcResult = unsafe { $call };
        trace!("ffi_exit {} -> {}", $name, res);
        res
    }};
}

fn check(res: NvrtcResult) -> NvResult<()> {
    if res == NVRTC_SUCCESS {
        Ok(())
    } else {
        Err(res)
    }
}

impl DynamicNvrtc {
    /// Open the library named by `config`, or the platform default names.
    pub fn open(config: &DriverConfig) -> Result<Self, NvrtcError> {
        let mut last_err = String::from("no candidate library names");
        for candidate in config.nvrtc_candidates() {
            match Self::open_path(&candidate) {
                Ok(nvrtc) => return Ok(nvrtc),
                Err(NvrtcError::LibraryLoad(e)) => {
                    debug!("failed to load {}: {}", candidate.display(), e);
                    last_err = format!("{}: {}", candidate.display(), e);
                }
                Err(other) => return Err(other),
            }
        }
        warn!("NVRTC library not found: {}", last_err);
        Err(NvrtcError::LibraryLoad(last_err))
    }

    pub fn open_path(path: &Path) -> Result<Self, NvrtcError> {
        let lib =
            unsafe { Library::new(path) }.map_err(|e| NvrtcError::LibraryLoad(e.to_string()))?;
        info!("loaded NVRTC from {}", path.display());
        unsafe {
            Ok(Self {
                version: resolve(&lib, "nvrtcVersion")?,
                create_program: resolve(&lib, "nvrtcCreateProgram")?,
                destroy_program: resolve(&lib, "nvrtcDestroyProgram")?,
                compile_program: resolve(&lib, "nvrtcCompileProgram")?,
                get_ptx_size: resolve(&lib, "nvrtcGetPTXSize")?,
                get_ptx: resolve(&lib, "nvrtcGetPTX")?,
                get_log_size: resolve(&lib, "nvrtcGetProgramLogSize")?,
                get_log: resolve(&lib, "nvrtcGetProgramLog")?,
                get_error_string: resolve_opt(&lib, "nvrtcGetErrorString"),
                get_num_supported_archs: resolve_opt(&lib, "nvrtcGetNumSupportedArchs"),
                get_supported_archs: resolve_opt(&lib, "nvrtcGetSupportedArchs"),
                _lib: lib,
            })
        }
    }

    /// Size query followed by a fill of that many bytes.
    fn read_text(
        &self,
        prog: RawProgram,
        size_fn: FnGetSize,
        text_fn: FnGetText,
    ) -> NvResult<Vec<u8>> {
        let mut size: usize = 0;
        check(nvrtc_call!("nvrtcGetSize", size_fn(prog as NvrtcProgram, &mut size)))?;
        let mut buf = vec![0u8; size];
        if size > 0 {
            check(nvrtc_call!(
                "nvrtcGetText",
                text_fn(prog as NvrtcProgram, buf.as_mut_ptr() as *mut c_char)
            ))?;
        }
        while buf.last() == Some(&0) {
            buf.pop();
        }
        Ok(buf)
    }
}

unsafe fn resolve<F: Copy>(lib: &Library, name: &str) -> Result<F, NvrtcError> {
    lib.get::<F>(name.as_bytes())
        .map(|s: Symbol<F>| *s)
        .map_err(|_| NvrtcError::MissingSymbol(name.to_string()))
}

unsafe fn resolve_opt<F: Copy>(lib: &Library, name: &str) -> Option<F> {
    lib.get::<F>(name.as_bytes()).ok().map(|s: Symbol<F>| *s)
}

impl NvrtcApi for DynamicNvrtc {
    fn version(&self) -> NvResult<(i32, i32)> {
        let (mut major, mut minor): (c_int, c_int) = (0, 0);
        check(nvrtc_call!("nvrtcVersion", (self.version)(&mut major, &mut minor)))?;
        Ok((major, minor))
    }

    fn supported_archs(&self) -> Option<NvResult<Vec<i32>>> {
        let count_fn = self.get_num_supported_archs?;
        let list_fn = self.get_supported_archs?;
        let mut count: c_int = 0;
        if let Err(e) = check(nvrtc_call!("nvrtcGetNumSupportedArchs", count_fn(&mut count))) {
            return Some(Err(e));
        }
        let mut archs = vec![0 as c_int; count.max(0) as usize];
        if archs.is_empty() {
            return Some(Ok(archs));
        }
        Some(
            check(nvrtc_call!("nvrtcGetSupportedArchs", list_fn(archs.as_mut_ptr())))
                .map(|()| archs),
        )
    }

    fn create_program(&self, source: &CStr, name: &CStr) -> NvResult<RawProgram> {
        let mut prog: NvrtcProgram = ptr::null_mut();
        check(nvrtc_call!(
            "nvrtcCreateProgram",
            (self.create_program)(
                &mut prog,
                source.as_ptr(),
                name.as_ptr(),
                0,
                ptr::null(),
                ptr::null(),
            )
        ))?;
        Ok(prog as RawProgram)
    }

    fn destroy_program(&self, prog: RawProgram) -> NvResult<()> {
        let mut prog = prog as NvrtcProgram;
        check(nvrtc_call!("nvrtcDestroyProgram", (self.destroy_program)(&mut prog)))
    }

    fn compile_program(&self, prog: RawProgram, options: &[&CStr]) -> NvResult<()> {
        let ptrs: Vec<*const c_char> = options.iter().map(|o| o.as_ptr()).collect();
        let count = c_int::try_from(ptrs.len()).map_err(|_| NVRTC_ERROR_INVALID_INPUT)?;
        let opts = if ptrs.is_empty() { ptr::null() } else { ptrs.as_ptr() };
        check(nvrtc_call!(
            "nvrtcCompileProgram",
            (self.compile_program)(prog as NvrtcProgram, count, opts)
        ))
    }

    fn get_ptx(&self, prog: RawProgram) -> NvResult<Vec<u8>> {
        self.read_text(prog, self.get_ptx_size, self.get_ptx)
    }

    fn get_program_log(&self, prog: RawProgram) -> NvResult<String> {
        let log = self.read_text(prog, self.get_log_size, self.get_log)?;
        Ok(String::from_utf8_lossy(&log).into_owned())
    }

    fn error_string(&self, code: NvrtcResult) -> Option<String> {
        let f = self.get_error_string?;
        let text = unsafe { f(code) };
        if text.is_null() {
            return None;
        }
        // Library-owned static strings.
        Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
    }
}
