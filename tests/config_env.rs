// CLASSIFICATION: COMMUNITY
// Filename: config_env.rs v0.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::env;
use std::path::PathBuf;

use serial_test::serial;

use cudrv::config::{self, bool_env, DriverConfig};

const VARS: [&str; 5] = [
    "CUDRV_LIBRARY_PATH",
    "CUDRV_NVRTC_PATH",
    "CUDRV_NVCC",
    "CUDRV_DUMP_CUDA_SOURCE_ON_ERROR",
    "CUDRV_COMPILE_WITH_DEBUG",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn bool_flags_follow_integer_rule() {
    clear_env();
    let name = "CUDRV_COMPILE_WITH_DEBUG";
    assert!(!bool_env(name, false));
    assert!(bool_env(name, true));

    for (val, expected) in [("", true), ("1", true), ("0", false), ("2", false), ("true", false)] {
        env::set_var(name, val);
        assert_eq!(bool_env(name, true), expected, "{val:?}");
    }
    clear_env();
}

#[test]
#[serial]
fn reload_picks_up_environment() {
    clear_env();
    env::set_var("CUDRV_LIBRARY_PATH", "/opt/cuda/lib64/libcuda.so.1");
    env::set_var("CUDRV_NVRTC_PATH", "/opt/cuda/lib64/libnvrtc.so.12");
    env::set_var("CUDRV_NVCC", "/opt/cuda/bin/nvcc");
    env::set_var("CUDRV_DUMP_CUDA_SOURCE_ON_ERROR", "1");
    env::set_var("CUDRV_COMPILE_WITH_DEBUG", "0");

    let cfg = config::reload_from_env().unwrap();
    assert_eq!(cfg.library_path, Some(PathBuf::from("/opt/cuda/lib64/libcuda.so.1")));
    assert_eq!(cfg.nvrtc_path, Some(PathBuf::from("/opt/cuda/lib64/libnvrtc.so.12")));
    assert_eq!(cfg.nvcc, PathBuf::from("/opt/cuda/bin/nvcc"));
    assert!(cfg.dump_source_on_error);
    assert!(!cfg.compile_with_debug);
    assert_eq!(config::get_config().unwrap(), cfg);

    clear_env();
    let cfg = config::reload_from_env().unwrap();
    assert_eq!(cfg.library_path, None);
    assert_eq!(cfg.nvrtc_path, None);
    assert!(!cfg.nvcc.as_os_str().is_empty());
    assert!(!cfg.dump_source_on_error);
}

#[test]
#[serial]
fn set_config_replaces_global() {
    let before = config::get_config().unwrap();
    let custom = DriverConfig {
        nvcc: PathBuf::from("/usr/local/cuda-12/bin/nvcc"),
        compile_with_debug: true,
        ..before.clone()
    };
    config::set_config(custom.clone()).unwrap();
    assert_eq!(config::get_config().unwrap(), custom);
    config::set_config(before).unwrap();
}

#[test]
#[serial]
fn dump_flag_is_read_when_compiling() {
    clear_env();
    let before = config::reload_from_env().unwrap();
    assert!(!config::dump_source_on_error().unwrap());

    // Set after the config was loaded; still honoured.
    env::set_var("CUDRV_DUMP_CUDA_SOURCE_ON_ERROR", "1");
    assert!(config::dump_source_on_error().unwrap());
    assert!(!config::get_config().unwrap().dump_source_on_error);

    env::set_var("CUDRV_DUMP_CUDA_SOURCE_ON_ERROR", "0");
    config::set_config(DriverConfig {
        dump_source_on_error: true,
        ..before.clone()
    })
    .unwrap();
    assert!(!config::dump_source_on_error().unwrap());

    env::remove_var("CUDRV_DUMP_CUDA_SOURCE_ON_ERROR");
    assert!(config::dump_source_on_error().unwrap());
    config::set_config(before).unwrap();
}
