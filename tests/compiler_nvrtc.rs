// CLASSIFICATION: COMMUNITY
// Filename: compiler_nvrtc.rs v0.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::sync::Arc;

use serial_test::serial;

use cudrv::compiler::{self, Backend, CompileError, Toolchain};
use cudrv::config;
use cudrv::nvrtc::status::*;
use cudrv::{ContextFlags, Driver, MockDriver, MockNvrtc, Nvrtc, NvrtcError};

const SOURCE: &str = include_str!("gpu_demos/add.cu");

fn mock_driver(major: i32, minor: i32) -> (Driver, cudrv::Context) {
    let mock = MockDriver::new().with_compute_capability(major, minor);
    let driver = Driver::with_api(Arc::new(mock));
    driver.init(0).unwrap();
    let dev = driver.device(0).unwrap();
    let ctx = driver.create_context(dev, ContextFlags::empty()).unwrap();
    (driver, ctx)
}

fn mock_nvrtc(mock: MockNvrtc) -> (Nvrtc, Arc<MockNvrtc>) {
    let mock = Arc::new(mock);
    (Nvrtc::with_api(mock.clone()), mock)
}

#[test]
#[serial]
fn compiles_source_to_ptx_for_arch() {
    let (nvrtc, mock) = mock_nvrtc(MockNvrtc::new());
    let opts = vec!["--use_fast_math".to_string()];
    let ptx = compiler::compile_using_nvrtc(&nvrtc, SOURCE, &opts, "75", "add.cu").unwrap();
    assert!(ptx.contains(".target sm_75"));
    assert!(ptx.contains(".entry sum"));
    assert_eq!(
        mock.last_options(),
        vec!["--use_fast_math".to_string(), "-arch=compute_75".to_string()]
    );
    assert_eq!(mock.live_programs(), 0);
}

#[test]
#[serial]
fn failed_compile_carries_program_log() {
    let (nvrtc, mock) = mock_nvrtc(MockNvrtc::new());
    let source = format!("{SOURCE}\n#error missing launch bounds\n");
    let err = compiler::compile_using_nvrtc(&nvrtc, &source, &[], "70", "add.cu").unwrap_err();
    let failure = match err {
        CompileError::Compile(f) => f,
        other => panic!("unexpected error {other:?}"),
    };
    assert_eq!(failure.compiler, Toolchain::Nvrtc);
    assert!(failure.message.starts_with("add.cu(19): error: #error directive"));
    assert_eq!(failure.name, "add.cu");
    assert_eq!(failure.options, vec!["-arch=compute_70".to_string()]);
    assert_eq!(failure.source_text, source);
    assert_eq!(mock.live_programs(), 0);

    let mut dump = Vec::new();
    failure.dump(&mut dump).unwrap();
    let dump = String::from_utf8(dump).unwrap();
    assert!(dump.starts_with("NVRTC compilation error: add.cu(19)"));
    assert!(dump.contains("Options: -arch=compute_70\n"));
}

#[test]
#[serial]
fn unsupported_arch_reports_invalid_option() {
    let (nvrtc, _mock) = mock_nvrtc(MockNvrtc::new());
    let err = compiler::compile_using_nvrtc(&nvrtc, SOURCE, &[], "35", "add.cu").unwrap_err();
    match err {
        CompileError::Compile(failure) => {
            assert!(failure.message.contains("compute_35"), "{}", failure.message)
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn arch_is_capped_by_nvrtc() {
    let (driver, _ctx) = mock_driver(9, 0);
    let (newest, _) = mock_nvrtc(MockNvrtc::new().with_supported_archs(Some(vec![70, 80, 89])));
    assert_eq!(compiler::default_arch(&driver, Some(&newest)).unwrap(), "89");
    assert_eq!(compiler::default_arch(&driver, None).unwrap(), "90");

    let legacy = MockNvrtc::new().with_version(8, 0).with_supported_archs(None);
    let (legacy, _) = mock_nvrtc(legacy);
    assert_eq!(compiler::default_arch(&driver, Some(&legacy)).unwrap(), "50");

    let (driver, _ctx) = mock_driver(6, 1);
    let (nvrtc, _) = mock_nvrtc(MockNvrtc::new().with_version(11, 0).with_supported_archs(None));
    assert_eq!(compiler::default_arch(&driver, Some(&nvrtc)).unwrap(), "61");
}

#[test]
#[serial]
fn compile_and_load_through_nvrtc() {
    let (driver, _ctx) = mock_driver(8, 6);
    let (nvrtc, mock) = mock_nvrtc(MockNvrtc::new());
    let module =
        compiler::compile_and_load(&driver, SOURCE, &[], None, Backend::Nvrtc(&nvrtc)).unwrap();
    assert!(module.function("sum").is_ok());
    assert_eq!(module.global("launches").unwrap().bytes, 4);
    assert!(mock.last_options().contains(&"-arch=compute_86".to_string()));
}

#[test]
#[serial]
fn debug_config_adds_nvrtc_debug_options() {
    let saved = config::get_config().unwrap();
    let mut cfg = saved.clone();
    cfg.compile_with_debug = true;
    config::set_config(cfg).unwrap();

    let (nvrtc, mock) = mock_nvrtc(MockNvrtc::new());
    let res = compiler::compile_using_nvrtc(&nvrtc, SOURCE, &[], "80", "add.cu");
    config::set_config(saved).unwrap();
    res.unwrap();
    assert_eq!(
        mock.last_options(),
        vec![
            "-arch=compute_80".to_string(),
            "--device-debug".to_string(),
            "--generate-line-info".to_string(),
        ]
    );
}

#[test]
fn program_handles_are_released() {
    let (nvrtc, mock) = mock_nvrtc(MockNvrtc::new());
    let prog = nvrtc.program(SOURCE, "add.cu").unwrap();
    assert_eq!(prog.name(), "add.cu");
    assert_eq!(mock.live_programs(), 1);

    // No PTX before a successful compile.
    let err = prog.ptx().unwrap_err();
    assert_eq!(err.code(), Some(NVRTC_ERROR_INVALID_PROGRAM));
    prog.compile(&[]).unwrap();
    assert!(String::from_utf8(prog.ptx().unwrap()).unwrap().contains(".target sm_52"));
    assert!(prog.log().unwrap().is_empty());
    drop(prog);
    assert_eq!(mock.live_programs(), 0);
}

/// Runs against whatever NVRTC the host has. Without one the loader has to
/// fail cleanly.
#[test]
#[serial]
fn load_system_nvrtc_or_fail_cleanly() {
    match Nvrtc::load() {
        Ok(nvrtc) => {
            let (major, _) = nvrtc.version().unwrap();
            assert!(major >= 9);
            let arch = nvrtc.max_arch().unwrap().to_string();
            let ptx = compiler::compile_using_nvrtc(&nvrtc, SOURCE, &[], &arch, "add.cu").unwrap();
            assert!(ptx.contains("sum"));
        }
        Err(NvrtcError::LibraryLoad(msg)) => println!("no NVRTC: {msg}"),
        Err(NvrtcError::MissingSymbol(sym)) => println!("NVRTC too old: {sym}"),
        Err(e) => panic!("unexpected error {e}"),
    }
}
