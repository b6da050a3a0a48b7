// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Runtime compilation of CUDA C++ to PTX through NVRTC.
//!
//! [`NvrtcApi`] is the raw call surface, [`Nvrtc`] maps its result codes to
//! [`NvrtcError`] and hands out [`Program`] handles that destroy their
//! native program when dropped.

mod library;
mod mock;

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config;

pub use library::DynamicNvrtc;
pub use mock::MockNvrtc;

/// `nvrtcResult` as returned by every NVRTC entry point.
pub type NvrtcResult = i32;
/// Opaque `nvrtcProgram` handle.
pub type RawProgram = usize;
/// Result of a raw NVRTC call.
pub type NvResult<T> = Result<T, NvrtcResult>;

pub mod status {
    use super::NvrtcResult;

    pub const NVRTC_SUCCESS: NvrtcResult = 0;
    pub const NVRTC_ERROR_OUT_OF_MEMORY: NvrtcResult = 1;
    pub const NVRTC_ERROR_PROGRAM_CREATION_FAILURE: NvrtcResult = 2;
    pub const NVRTC_ERROR_INVALID_INPUT: NvrtcResult = 3;
    pub const NVRTC_ERROR_INVALID_PROGRAM: NvrtcResult = 4;
    pub const NVRTC_ERROR_INVALID_OPTION: NvrtcResult = 5;
    pub const NVRTC_ERROR_COMPILATION: NvrtcResult = 6;
    pub const NVRTC_ERROR_BUILTIN_OPERATION_FAILURE: NvrtcResult = 7;
}

use status::*;

/// Symbolic name of an NVRTC result, as `nvrtcGetErrorString` spells it.
pub fn error_name(code: NvrtcResult) -> &'static str {
    match code {
        NVRTC_SUCCESS => "NVRTC_SUCCESS",
        NVRTC_ERROR_OUT_OF_MEMORY => "NVRTC_ERROR_OUT_OF_MEMORY",
        NVRTC_ERROR_PROGRAM_CREATION_FAILURE => "NVRTC_ERROR_PROGRAM_CREATION_FAILURE",
        NVRTC_ERROR_INVALID_INPUT => "NVRTC_ERROR_INVALID_INPUT",
        NVRTC_ERROR_INVALID_PROGRAM => "NVRTC_ERROR_INVALID_PROGRAM",
        NVRTC_ERROR_INVALID_OPTION => "NVRTC_ERROR_INVALID_OPTION",
        NVRTC_ERROR_COMPILATION => "NVRTC_ERROR_COMPILATION",
        NVRTC_ERROR_BUILTIN_OPERATION_FAILURE => "NVRTC_ERROR_BUILTIN_OPERATION_FAILURE",
        _ => "NVRTC_ERROR unknown",
    }
}

/// Backend implementing the NVRTC entry points used here.
pub trait NvrtcApi: Send + Sync {
    /// `nvrtcVersion`
    fn version(&self) -> NvResult<(i32, i32)>;

    /// `nvrtcGetNumSupportedArchs` plus `nvrtcGetSupportedArchs`. `None`
    /// when the library predates them.
    fn supported_archs(&self) -> Option<NvResult<Vec<i32>>>;

    /// `nvrtcCreateProgram` without extra headers.
    fn create_program(&self, source: &CStr, name: &CStr) -> NvResult<RawProgram>;

    /// `nvrtcDestroyProgram`
    fn destroy_program(&self, prog: RawProgram) -> NvResult<()>;

    /// `nvrtcCompileProgram`
    fn compile_program(&self, prog: RawProgram, options: &[&CStr]) -> NvResult<()>;

    /// `nvrtcGetPTXSize` plus `nvrtcGetPTX`, without the trailing NUL.
    fn get_ptx(&self, prog: RawProgram) -> NvResult<Vec<u8>>;

    /// `nvrtcGetProgramLogSize` plus `nvrtcGetProgramLog`.
    fn get_program_log(&self, prog: RawProgram) -> NvResult<String>;

    /// `nvrtcGetErrorString`
    fn error_string(&self, code: NvrtcResult) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NvrtcError {
    #[error("{name}")]
    Call { code: NvrtcResult, name: String },
    #[error("failed to load NVRTC library: {0}")]
    LibraryLoad(String),
    #[error("NVRTC symbol {0} not found")]
    MissingSymbol(String),
}

impl NvrtcError {
    /// Native result code, when the failure came from an NVRTC call.
    pub fn code(&self) -> Option<NvrtcResult> {
        match self {
            NvrtcError::Call { code, .. } => Some(*code),
            _ => None,
        }
    }

    fn from_code(code: NvrtcResult) -> Self {
        NvrtcError::Call {
            code,
            name: error_name(code).to_string(),
        }
    }
}

/// Cloneable NVRTC entry point shared by every [`Program`] it creates.
#[derive(Clone)]
pub struct Nvrtc {
    api: Arc<dyn NvrtcApi>,
}

impl fmt::Debug for Nvrtc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nvrtc").finish_non_exhaustive()
    }
}

impl Nvrtc {
    /// Open the NVRTC library named by the global configuration.
    pub fn load() -> Result<Self, NvrtcError> {
        let cfg = config::get_config().map_err(|e| NvrtcError::LibraryLoad(e.to_string()))?;
        let nvrtc = Self::with_api(Arc::new(DynamicNvrtc::open(&cfg)?));
        if let Ok((major, minor)) = nvrtc.version() {
            info!("NVRTC {}.{} loaded", major, minor);
        }
        Ok(nvrtc)
    }

    /// Wrap an arbitrary backend, e.g. [`MockNvrtc`].
    pub fn with_api(api: Arc<dyn NvrtcApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &dyn NvrtcApi {
        self.api.as_ref()
    }

    pub fn check<T>(&self, res: NvResult<T>) -> Result<T, NvrtcError> {
        res.map_err(|code| NvrtcError::Call {
            code,
            name: self
                .api
                .error_string(code)
                .unwrap_or_else(|| error_name(code).to_string()),
        })
    }

    pub fn version(&self) -> Result<(i32, i32), NvrtcError> {
        self.check(self.api.version())
    }

    /// Newest virtual architecture this NVRTC can target, as `major * 10 +
    /// minor`. Libraries without the supported-arch query are capped at 50
    /// before NVRTC 9 and at 70 from then on.
    pub fn max_arch(&self) -> Result<i32, NvrtcError> {
        if let Some(res) = self.api.supported_archs() {
            if let Some(max) = self.check(res)?.into_iter().max() {
                return Ok(max);
            }
        }
        let (major, _) = self.version()?;
        Ok(if major < 9 { 50 } else { 70 })
    }

    /// Create a program from `source`; `name` shows up in diagnostics.
    pub fn program(&self, source: &str, name: &str) -> Result<Program, NvrtcError> {
        Program::create(self, source, name)
    }
}

/// `nvrtcProgram` owned by this process; destroyed when dropped.
#[derive(Debug)]
pub struct Program {
    nvrtc: Nvrtc,
    raw: RawProgram,
    name: String,
}

impl Program {
    pub fn create(nvrtc: &Nvrtc, source: &str, name: &str) -> Result<Self, NvrtcError> {
        let invalid = |_| NvrtcError::from_code(NVRTC_ERROR_INVALID_INPUT);
        let c_source = CString::new(source).map_err(invalid)?;
        let c_name = CString::new(name).map_err(invalid)?;
        let raw = nvrtc.check(nvrtc.api().create_program(&c_source, &c_name))?;
        debug!("created NVRTC program {:#x} for {}", raw, name);
        Ok(Self {
            nvrtc: nvrtc.clone(),
            raw,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_raw(&self) -> RawProgram {
        self.raw
    }

    pub fn compile(&self, options: &[String]) -> Result<(), NvrtcError> {
        let owned = options
            .iter()
            .map(|o| CString::new(o.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| NvrtcError::from_code(NVRTC_ERROR_INVALID_OPTION))?;
        let refs: Vec<&CStr> = owned.iter().map(|o| o.as_c_str()).collect();
        debug!("compiling {} with {}", self.name, options.join(" "));
        self.nvrtc.check(self.nvrtc.api().compile_program(self.raw, &refs))
    }

    /// PTX of a successful compilation.
    pub fn ptx(&self) -> Result<Vec<u8>, NvrtcError> {
        self.nvrtc.check(self.nvrtc.api().get_ptx(self.raw))
    }

    /// Compiler log of the last compilation.
    pub fn log(&self) -> Result<String, NvrtcError> {
        self.nvrtc.check(self.nvrtc.api().get_program_log(self.raw))
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Err(e) = self.nvrtc.check(self.nvrtc.api().destroy_program(self.raw)) {
            warn!("failed to destroy NVRTC program {:#x}: {}", self.raw, e);
        }
    }
}
