// CLASSIFICATION: COMMUNITY
// Filename: compiler.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Kernel compilation on top of the driver bindings.
//!
//! CUDA C++ source is compiled either in process through NVRTC, which
//! yields PTX, or with `nvcc` to PTX or cubin. PTX is turned into a
//! loadable cubin through a driver link session.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::{self, ConfigError};
use crate::cuda::{CudaError, Device, Driver, DriverError, JitInputType, Module};
use crate::nvrtc::{Nvrtc, NvrtcError};

/// Output requested from `nvcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    Cubin,
    Ptx,
}

impl CodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeType::Cubin => "cubin",
            CodeType::Ptx => "ptx",
        }
    }
}

impl FromStr for CodeType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cubin" => Ok(CodeType::Cubin),
            "ptx" => Ok(CodeType::Ptx),
            other => Err(CompileError::InvalidCodeType(other.to_string())),
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiler output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledCode {
    Ptx(String),
    Cubin(Vec<u8>),
}

impl CompiledCode {
    pub fn kind(&self) -> JitInputType {
        match self {
            CompiledCode::Ptx(_) => JitInputType::Ptx,
            CompiledCode::Cubin(_) => JitInputType::Cubin,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CompiledCode::Ptx(text) => text.as_bytes(),
            CompiledCode::Cubin(bytes) => bytes,
        }
    }
}

/// Compiler that produced a [`CompileFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    Nvrtc,
    Nvcc,
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Toolchain::Nvrtc => "NVRTC",
            Toolchain::Nvcc => "NVCC",
        })
    }
}

/// Which compiler [`compile_and_load`] drives.
#[derive(Debug, Clone, Copy)]
pub enum Backend<'a> {
    /// In-process NVRTC; always produces PTX.
    Nvrtc(&'a Nvrtc),
    Nvcc(CodeType),
}

/// A failed compilation with everything needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub compiler: Toolchain,
    pub message: String,
    pub source_text: String,
    pub name: String,
    pub options: Vec<String>,
}

impl CompileFailure {
    /// Write the message, options and the numbered source.
    pub fn dump<W: Write>(&self, f: &mut W) -> io::Result<()> {
        let lines: Vec<&str> = self.source_text.split('\n').collect();
        let digits = lines.len().to_string().len();
        writeln!(f, "{} compilation error: {}", self.compiler, self.message)?;
        writeln!(f, "-----")?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Options: {}", self.options.join(" "))?;
        writeln!(f, "CUDA source:")?;
        for (i, line) in lines.iter().enumerate() {
            writeln!(f, "{:0width$} {}", i + 1, line.trim_end(), width = digits)?;
        }
        writeln!(f, "-----")?;
        f.flush()
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Dump `failure` to stderr when the dump flag is on at this moment.
fn report(failure: &CompileFailure) -> Result<(), ConfigError> {
    if config::dump_source_on_error()? {
        if let Err(e) = failure.dump(&mut io::stderr()) {
            warn!("failed to dump {} source: {}", failure.name, e);
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Compile(CompileFailure),
    #[error("failed to run `{}`. Check PATH environment variable: {err}", .nvcc.display())]
    Spawn { nvcc: PathBuf, err: io::Error },
    #[error("code_type must be cubin or ptx, got {0:?}")]
    InvalidCodeType(String),
    #[error("invalid kernel name {0:?}")]
    InvalidKernelName(String),
    #[error("compiler produced non UTF-8 PTX")]
    InvalidPtx,
    #[error(transparent)]
    Nvrtc(#[from] NvrtcError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cuda(#[from] CudaError),
}

impl From<DriverError> for CompileError {
    fn from(e: DriverError) -> Self {
        CompileError::Cuda(e.into())
    }
}

/// `true` when `name` is a plain C identifier.
pub fn is_valid_kernel_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `"<major><minor>"` of the device, e.g. `"86"`.
pub fn arch_for_device(driver: &Driver, device: Device) -> Result<String, DriverError> {
    let (major, minor) = driver.compute_capability(device)?;
    Ok(format!("{major}{minor}"))
}

/// Architecture for the current context's device. With `nvrtc` it is
/// capped at the newest architecture that NVRTC can target.
pub fn default_arch(driver: &Driver, nvrtc: Option<&Nvrtc>) -> Result<String, CompileError> {
    let (major, minor) = driver.compute_capability(driver.current_device()?)?;
    let mut arch = major * 10 + minor;
    if let Some(nvrtc) = nvrtc {
        let cap = nvrtc.max_arch()?;
        if arch > cap {
            debug!("capping compute_{} at NVRTC maximum compute_{}", arch, cap);
            arch = cap;
        }
    }
    Ok(arch.to_string())
}

fn file_stem(filename: &str) -> &str {
    match filename.split('.').next() {
        Some(stem) if !stem.is_empty() => stem,
        _ => "kern",
    }
}

/// Compile `source` with `nvcc` for one architecture.
pub fn compile_using_nvcc(
    source: &str,
    options: &[String],
    arch: &str,
    filename: &str,
    code_type: CodeType,
) -> Result<CompiledCode, CompileError> {
    let cfg = config::get_config()?;

    let mut args = vec![
        format!("--{}", code_type.as_str()),
        format!("-gencode=arch=compute_{arch},code=sm_{arch}"),
    ];
    args.extend(options.iter().cloned());
    if cfg.compile_with_debug {
        args.push("--device-debug".into());
        args.push("--generate-line-info".into());
    }

    let root = tempfile::tempdir()?;
    let stem = file_stem(filename);
    let cu_path = root.path().join(format!("{stem}.cu"));
    let result_path = root.path().join(format!("{stem}.{}", code_type.as_str()));
    fs::write(&cu_path, source)?;

    debug!("running {} {}", cfg.nvcc.display(), args.join(" "));
    let output = Command::new(&cfg.nvcc)
        .args(&args)
        .arg(&cu_path)
        .current_dir(root.path())
        .output()
        .map_err(|err| CompileError::Spawn {
            nvcc: cfg.nvcc.clone(),
            err,
        })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let command = format!("{} {} {}", cfg.nvcc.display(), args.join(" "), cu_path.display());
        let failure = CompileFailure {
            compiler: Toolchain::Nvcc,
            message: format!(
                "`nvcc` command returns non-zero exit status. \ncommand: {command}\n\
                 return-code: {code}\nstdout/stderr: \n{combined}"
            ),
            source_text: source.to_string(),
            name: cu_path.display().to_string(),
            options: options.to_vec(),
        };
        report(&failure)?;
        // Keep the work directory for inspection.
        let kept = root.keep();
        warn!("nvcc failed; sources kept in {}", kept.display());
        return Err(CompileError::Compile(failure));
    }

    let code = match code_type {
        CodeType::Ptx => {
            let bytes = fs::read(&result_path)?;
            CompiledCode::Ptx(String::from_utf8(bytes).map_err(|_| CompileError::InvalidPtx)?)
        }
        CodeType::Cubin => CompiledCode::Cubin(fs::read(&result_path)?),
    };
    info!("compiled {} to {} ({} bytes)", filename, code_type, code.as_bytes().len());
    Ok(code)
}

/// Compile `source` to PTX with NVRTC for `compute_<arch>`.
///
/// On failure the program log becomes the [`CompileFailure`] message and
/// the options recorded are the full list handed to NVRTC.
pub fn compile_using_nvrtc(
    nvrtc: &Nvrtc,
    source: &str,
    options: &[String],
    arch: &str,
    filename: &str,
) -> Result<String, CompileError> {
    let cfg = config::get_config()?;
    let mut opts = options.to_vec();
    opts.push(format!("-arch=compute_{arch}"));
    if cfg.compile_with_debug {
        opts.push("--device-debug".into());
        opts.push("--generate-line-info".into());
    }

    let prog = nvrtc.program(source, filename)?;
    if let Err(err) = prog.compile(&opts) {
        let log = prog.log().unwrap_or_default();
        let failure = CompileFailure {
            compiler: Toolchain::Nvrtc,
            message: if log.trim().is_empty() { err.to_string() } else { log },
            source_text: source.to_string(),
            name: filename.to_string(),
            options: opts,
        };
        report(&failure)?;
        warn!("NVRTC failed to compile {}: {}", filename, err);
        return Err(CompileError::Compile(failure));
    }
    let ptx = String::from_utf8(prog.ptx()?).map_err(|_| CompileError::InvalidPtx)?;
    info!("compiled {} with NVRTC for compute_{} ({} bytes)", filename, arch, ptx.len());
    Ok(ptx)
}

/// Link one PTX input into a cubin through a driver link session.
pub fn link_ptx(driver: &Driver, ptx: &str, name: &str) -> Result<Vec<u8>, CudaError> {
    let mut link = driver.link()?;
    link.add_ptx(ptx, name)?;
    let cubin = link.complete()?;
    link.destroy()?;
    Ok(cubin)
}

/// Compile `source` with `backend` and load the result into the current
/// context. PTX output goes through [`link_ptx`] first. Without `arch` the
/// target comes from [`default_arch`].
pub fn compile_and_load(
    driver: &Driver,
    source: &str,
    options: &[String],
    arch: Option<&str>,
    backend: Backend<'_>,
) -> Result<Module, CompileError> {
    let arch = match (arch, backend) {
        (Some(arch), _) => arch.to_string(),
        (None, Backend::Nvrtc(nvrtc)) => default_arch(driver, Some(nvrtc))?,
        (None, Backend::Nvcc(_)) => default_arch(driver, None)?,
    };
    let cubin = match backend {
        Backend::Nvrtc(nvrtc) => {
            let ptx = compile_using_nvrtc(nvrtc, source, options, &arch, "kern.cu")?;
            link_ptx(driver, &ptx, "kern.ptx")?
        }
        Backend::Nvcc(code_type) => {
            match compile_using_nvcc(source, options, &arch, "kern.cu", code_type)? {
                CompiledCode::Ptx(ptx) => link_ptx(driver, &ptx, "kern.ptx")?,
                CompiledCode::Cubin(bytes) => bytes,
            }
        }
    };
    Ok(Module::load_data(driver, &cubin)?)
}
