// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-17

use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// nvcc location discovered by the build script.
const BUILD_NVCC: &str = env!("CUDRV_BUILD_NVCC");

pub const DUMP_SOURCE_ENV: &str = "CUDRV_DUMP_CUDA_SOURCE_ON_ERROR";

/// Runtime configurable driver and compiler settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// Explicit driver library; platform defaults are tried when unset.
    pub library_path: Option<PathBuf>,
    /// Explicit NVRTC library; platform defaults are tried when unset.
    pub nvrtc_path: Option<PathBuf>,
    pub nvcc: PathBuf,
    /// Stored default for dumping failed sources. The environment
    /// variable, when set, takes precedence at compile time; see
    /// [`dump_source_on_error`].
    pub dump_source_on_error: bool,
    pub compile_with_debug: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            library_path: std::env::var_os("CUDRV_LIBRARY_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            nvrtc_path: std::env::var_os("CUDRV_NVRTC_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            nvcc: std::env::var_os("CUDRV_NVCC")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(BUILD_NVCC)),
            dump_source_on_error: bool_env(DUMP_SOURCE_ENV, false),
            compile_with_debug: bool_env("CUDRV_COMPILE_WITH_DEBUG", false),
        }
    }
}

impl DriverConfig {
    /// Driver library names to try, in order.
    pub fn library_candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.library_path {
            return vec![path.clone()];
        }
        default_library_names().iter().map(PathBuf::from).collect()
    }

    /// NVRTC library names to try, in order.
    pub fn nvrtc_candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.nvrtc_path {
            return vec![path.clone()];
        }
        default_nvrtc_names().iter().map(PathBuf::from).collect()
    }
}

#[cfg(target_os = "windows")]
fn default_library_names() -> &'static [&'static str] {
    &["nvcuda.dll"]
}

#[cfg(target_os = "macos")]
fn default_library_names() -> &'static [&'static str] {
    &["libcuda.dylib"]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_library_names() -> &'static [&'static str] {
    &["libcuda.so.1", "libcuda.so"]
}

#[cfg(target_os = "windows")]
fn default_nvrtc_names() -> &'static [&'static str] {
    &["nvrtc64_120_0.dll", "nvrtc64_112_0.dll", "nvrtc64_110_0.dll"]
}

#[cfg(target_os = "macos")]
fn default_nvrtc_names() -> &'static [&'static str] {
    &["libnvrtc.dylib"]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_nvrtc_names() -> &'static [&'static str] {
    &["libnvrtc.so", "libnvrtc.so.12", "libnvrtc.so.11.2"]
}

/// Interpret a flag variable: unset or empty gives `default`, an integer
/// is true only when it equals 1, anything else is false.
pub fn bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_flag(&val),
        _ => default,
    }
}

fn parse_flag(val: &str) -> bool {
    val.trim().parse::<i64>().map(|v| v == 1).unwrap_or(false)
}

static CONFIG: Lazy<RwLock<DriverConfig>> = Lazy::new(|| RwLock::new(DriverConfig::default()));

/// Errors produced by config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("driver config lock poisoned")]
    LockPoisoned,
}

/// Replace the global configuration.
pub fn set_config(cfg: DriverConfig) -> Result<(), ConfigError> {
    let mut guard = CONFIG.write().map_err(|_| ConfigError::LockPoisoned)?;
    *guard = cfg;
    Ok(())
}

/// Get a clone of the current configuration.
pub fn get_config() -> Result<DriverConfig, ConfigError> {
    CONFIG
        .read()
        .map_err(|_| ConfigError::LockPoisoned)
        .map(|g| g.clone())
}

/// Re-read the configuration from the environment.
pub fn reload_from_env() -> Result<DriverConfig, ConfigError> {
    let cfg = DriverConfig::default();
    set_config(cfg.clone())?;
    Ok(cfg)
}

/// Whether a failed compilation dumps its source to stderr. Read on every
/// call: `CUDRV_DUMP_CUDA_SOURCE_ON_ERROR` decides when set, otherwise the
/// stored configuration does.
pub fn dump_source_on_error() -> Result<bool, ConfigError> {
    let cfg = get_config()?;
    Ok(bool_env(DUMP_SOURCE_ENV, cfg.dump_source_on_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("2"));
        assert!(!parse_flag("yes"));
    }

    #[test]
    fn explicit_library_path_wins() {
        let cfg = DriverConfig {
            library_path: Some(PathBuf::from("/opt/cuda/libcuda.so")),
            ..DriverConfig::default()
        };
        assert_eq!(cfg.library_candidates(), vec![PathBuf::from("/opt/cuda/libcuda.so")]);
    }

    #[test]
    fn default_candidates_not_empty() {
        let cfg = DriverConfig {
            library_path: None,
            nvrtc_path: None,
            ..DriverConfig::default()
        };
        assert!(!cfg.library_candidates().is_empty());
        assert!(!cfg.nvrtc_candidates().is_empty());
    }

    #[test]
    fn explicit_nvrtc_path_wins() {
        let cfg = DriverConfig {
            nvrtc_path: Some(PathBuf::from("/opt/cuda/lib64/libnvrtc.so.12")),
            ..DriverConfig::default()
        };
        assert_eq!(
            cfg.nvrtc_candidates(),
            vec![PathBuf::from("/opt/cuda/lib64/libnvrtc.so.12")]
        );
    }
}
