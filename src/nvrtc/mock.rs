// CLASSIFICATION: COMMUNITY
// Filename: mock.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! In-process stand-in for NVRTC.
//!
//! "Compiles" CUDA C++ by reading the `__global__` kernels and top-level
//! `__device__` scalars out of the source and emitting PTX the mock driver
//! can load. Braces must balance and an `#error` directive fails the
//! compilation with a log in NVRTC's format.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

use log::debug;

use super::status::*;
use super::{error_name, NvResult, NvrtcApi, NvrtcResult, RawProgram};

const DEFAULT_ARCH: i32 = 52;

struct MockProgram {
    source: String,
    name: String,
    ptx: Option<String>,
    log: String,
}

#[derive(Default)]
struct MockNvrtcState {
    programs: HashMap<RawProgram, MockProgram>,
    next_handle: RawProgram,
    last_options: Vec<String>,
}

pub struct MockNvrtc {
    version: (i32, i32),
    archs: Option<Vec<i32>>,
    state: Mutex<MockNvrtcState>,
}

impl Default for MockNvrtc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNvrtc {
    /// NVRTC 12.4 supporting `compute_50` through `compute_90`.
    pub fn new() -> Self {
        Self {
            version: (12, 4),
            archs: Some(vec![50, 52, 53, 60, 61, 62, 70, 72, 75, 80, 86, 87, 89, 90]),
            state: Mutex::new(MockNvrtcState {
                next_handle: 0x7000,
                ..MockNvrtcState::default()
            }),
        }
    }

    pub fn with_version(mut self, major: i32, minor: i32) -> Self {
        self.version = (major, minor);
        self
    }

    /// `None` behaves like a library without the supported-arch query.
    pub fn with_supported_archs(mut self, archs: Option<Vec<i32>>) -> Self {
        self.archs = archs;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockNvrtcState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn live_programs(&self) -> usize {
        self.lock().programs.len()
    }

    /// Options passed to the most recent compile call.
    pub fn last_options(&self) -> Vec<String> {
        self.lock().last_options.clone()
    }

    fn target_arch(&self, options: &[String]) -> Result<i32, String> {
        let mut arch = DEFAULT_ARCH;
        for opt in options {
            let value = opt
                .strip_prefix("-arch=")
                .or_else(|| opt.strip_prefix("--gpu-architecture="));
            let Some(value) = value else {
                if !opt.starts_with('-') {
                    return Err(format!("nvrtc: error: unrecognized option {opt}"));
                }
                continue;
            };
            arch = value
                .strip_prefix("compute_")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| format!("nvrtc: error: invalid value for -arch: {value}"))?;
        }
        match &self.archs {
            Some(list) if !list.contains(&arch) => {
                Err(format!("nvrtc: error: invalid value for -arch: compute_{arch}"))
            }
            _ => Ok(arch),
        }
    }
}

fn kernel_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for (pos, _) in source.match_indices("__global__") {
        let rest = &source[pos..];
        let Some(open) = rest.find('(') else {
            continue;
        };
        let head = rest[..open].trim_end();
        let start = head
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map_or(0, |i| i + 1);
        if start < head.len() {
            names.push(head[start..].to_string());
        }
    }
    names
}

fn scalar_ptx_type(ty: &str) -> Option<(&'static str, usize)> {
    let ty = match ty {
        "int" | "signed int" => ".s32",
        "unsigned" | "unsigned int" => ".u32",
        "float" => ".f32",
        "double" => ".f64",
        "long long" => ".s64",
        "unsigned long long" => ".u64",
        "char" | "unsigned char" => ".b8",
        _ => return None,
    };
    let bytes = match ty {
        ".f64" | ".s64" | ".u64" => 8,
        ".b8" => 1,
        _ => 4,
    };
    Some((ty, bytes))
}

/// Top-level `__device__ <scalar> name;` declarations.
fn device_scalars(source: &str) -> Vec<(String, &'static str, usize)> {
    let mut out = Vec::new();
    for line in source.lines() {
        let Some(decl) = line.trim().strip_prefix("__device__") else {
            continue;
        };
        let Some(decl) = decl.trim().strip_suffix(';') else {
            continue;
        };
        if decl.contains('(') || decl.contains('=') {
            continue;
        }
        let words: Vec<&str> = decl.split_whitespace().collect();
        let Some((name, ty)) = words.split_last() else {
            continue;
        };
        if let Some((ptx_ty, bytes)) = scalar_ptx_type(&ty.join(" ")) {
            out.push((name.to_string(), ptx_ty, bytes));
        }
    }
    out
}

/// Check the source and produce PTX, or the log of the failure.
fn translate(name: &str, source: &str, arch: i32) -> Result<String, String> {
    let summary = format!("\n1 error detected in the compilation of \"{name}\".\n");
    for (i, line) in source.lines().enumerate() {
        if let Some(msg) = line.trim().strip_prefix("#error") {
            let line = i + 1;
            let msg = msg.trim();
            return Err(format!("{name}({line}): error: #error directive: {msg}\n{summary}"));
        }
    }
    let mut depth: i64 = 0;
    for c in source.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        let last = source.lines().count();
        return Err(format!("{name}({last}): error: expected a \"}}\"\n{summary}"));
    }

    let mut ptx = String::new();
    ptx.push_str("//\n// Generated by mock NVRTC\n//\n\n");
    let _ = write!(ptx, ".version 7.0\n.target sm_{arch}\n.address_size 64\n\n");
    for (var, ty, bytes) in device_scalars(source) {
        let _ = writeln!(ptx, ".visible .global .align {bytes} {ty} {var};");
    }
    for kernel in kernel_names(source) {
        let _ = write!(ptx, "\n.visible .entry {kernel}()\n{{\n\tret;\n}}\n");
    }
    Ok(ptx)
}

impl NvrtcApi for MockNvrtc {
    fn version(&self) -> NvResult<(i32, i32)> {
        Ok(self.version)
    }

    fn supported_archs(&self) -> Option<NvResult<Vec<i32>>> {
        self.archs.clone().map(Ok)
    }

    fn create_program(&self, source: &CStr, name: &CStr) -> NvResult<RawProgram> {
        let source = source.to_str().map_err(|_| NVRTC_ERROR_INVALID_INPUT)?;
        let mut st = self.lock();
        st.next_handle += 0x10;
        let prog = st.next_handle;
        st.programs.insert(
            prog,
            MockProgram {
                source: source.to_string(),
                name: name.to_string_lossy().into_owned(),
                ptx: None,
                log: String::new(),
            },
        );
        Ok(prog)
    }

    fn destroy_program(&self, prog: RawProgram) -> NvResult<()> {
        let mut st = self.lock();
        st.programs.remove(&prog).map(|_| ()).ok_or(NVRTC_ERROR_INVALID_PROGRAM)
    }

    fn compile_program(&self, prog: RawProgram, options: &[&CStr]) -> NvResult<()> {
        let options: Vec<String> = options
            .iter()
            .map(|o| o.to_string_lossy().into_owned())
            .collect();
        let mut st = self.lock();
        st.last_options = options.clone();
        let program = st.programs.get_mut(&prog).ok_or(NVRTC_ERROR_INVALID_PROGRAM)?;
        program.ptx = None;
        let arch = match self.target_arch(&options) {
            Ok(arch) => arch,
            Err(log) => {
                program.log = log;
                return Err(NVRTC_ERROR_INVALID_OPTION);
            }
        };
        match translate(&program.name, &program.source, arch) {
            Ok(ptx) => {
                debug!("mock nvrtc: compiled {} for compute_{}", program.name, arch);
                program.log.clear();
                program.ptx = Some(ptx);
                Ok(())
            }
            Err(log) => {
                program.log = log;
                Err(NVRTC_ERROR_COMPILATION)
            }
        }
    }

    fn get_ptx(&self, prog: RawProgram) -> NvResult<Vec<u8>> {
        let st = self.lock();
        let program = st.programs.get(&prog).ok_or(NVRTC_ERROR_INVALID_PROGRAM)?;
        program
            .ptx
            .as_ref()
            .map(|p| p.as_bytes().to_vec())
            .ok_or(NVRTC_ERROR_INVALID_PROGRAM)
    }

    fn get_program_log(&self, prog: RawProgram) -> NvResult<String> {
        let st = self.lock();
        let program = st.programs.get(&prog).ok_or(NVRTC_ERROR_INVALID_PROGRAM)?;
        Ok(program.log.clone())
    }

    fn error_string(&self, code: NvrtcResult) -> Option<String> {
        Some(error_name(code).to_string())
    }
}
