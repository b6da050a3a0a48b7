// CLASSIFICATION: COMMUNITY
// Filename: kernel_launch.rs v0.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::ffi::c_void;
use std::sync::Arc;

use cudrv::cuda::types::status::*;
use cudrv::{
    ArgBuffer, ContextFlags, DevicePtr, Dim3, Driver, KernelArgs, LaunchConfig, MockDriver,
};

const ADD_PTX: &[u8] = include_bytes!("gpu_demos/add.ptx");

const NOARG_PTX: &str = ".version 7.0\n.target sm_70\n.visible .entry tick()\n{\n    ret;\n}\n";

fn setup() -> (Driver, Arc<MockDriver>) {
    let mock = Arc::new(MockDriver::new());
    let driver = Driver::with_api(mock.clone());
    driver.init(0).unwrap();
    (driver, mock)
}

fn sum_args(n: u32) -> KernelArgs {
    let mut args = KernelArgs::new();
    args.push(DevicePtr(0x1000))
        .push(DevicePtr(0x2000))
        .push(DevicePtr(0x3000))
        .push(n);
    args
}

#[test]
fn launch_with_kernel_params() {
    let (driver, mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let sum = module.function("sum").unwrap();

    let cfg = LaunchConfig::for_elements(1000, 128).shared_mem(256);
    let mut args = sum_args(1000);
    unsafe { sum.launch(&cfg, &mut args) }.unwrap();

    let launches = mock.launches();
    assert_eq!(launches.len(), 1);
    let rec = &launches[0];
    assert_eq!(rec.function, sum.as_raw());
    assert_eq!(rec.name, "sum");
    assert_eq!(rec.grid, Dim3::new(8, 1, 1));
    assert_eq!(rec.block, Dim3::new(128, 1, 1));
    assert_eq!(rec.shared_mem_bytes, 256);
    assert_eq!(rec.stream, 0);
    assert_eq!(rec.param_count, 4);
    assert_eq!(rec.extra_buffer_bytes, None);
}

#[test]
fn launch_with_packed_buffer() {
    let (driver, mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let sum = module.function("sum").unwrap();

    let mut buf = ArgBuffer::new();
    buf.push(DevicePtr(0x1000))
        .push(DevicePtr(0x2000))
        .push(DevicePtr(0x3000))
        .push(64u32);
    unsafe { sum.launch_packed(&LaunchConfig::new((2, 2), (16, 16)), &mut buf) }.unwrap();

    let rec = mock.launches().pop().unwrap();
    assert_eq!(rec.grid, Dim3::new(2, 2, 1));
    assert_eq!(rec.block, Dim3::new(16, 16, 1));
    assert_eq!(rec.param_count, 0);
    assert_eq!(rec.extra_buffer_bytes, Some(28));
}

#[test]
fn kernel_without_arguments() {
    let (driver, mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(NOARG_PTX.as_bytes()).unwrap();
    let tick = module.function("tick").unwrap();
    unsafe { tick.launch(&LaunchConfig::new(1, 1), &mut KernelArgs::new()) }.unwrap();
    assert_eq!(mock.launches()[0].param_count, 0);
}

#[test]
fn invalid_dimensions_are_rejected() {
    let (driver, mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let sum = module.function("sum").unwrap();

    for cfg in [
        LaunchConfig::new(0, 128),
        LaunchConfig::new(1, (0, 1, 1)),
        LaunchConfig::new(1, (32, 32, 2)),
        LaunchConfig::new(1, 2048),
    ] {
        let err = unsafe { sum.launch(&cfg, &mut sum_args(1)) }.unwrap_err();
        assert_eq!(err.driver_code(), Some(CUDA_ERROR_INVALID_VALUE), "{cfg:?}");
    }
    assert!(mock.launches().is_empty());

    unsafe { sum.launch(&LaunchConfig::new(1, (32, 32, 1)), &mut sum_args(1)) }.unwrap();
    assert_eq!(mock.launches().len(), 1);
}

#[test]
fn launch_in_foreign_context_fails() {
    let (driver, mock) = setup();
    let dev = driver.device(0).unwrap();
    let owner = driver.create_context(dev, ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let sum = module.function("sum").unwrap();

    let _other = driver.create_context(dev, ContextFlags::empty()).unwrap();
    let err = unsafe { sum.launch(&LaunchConfig::new(1, 32), &mut sum_args(32)) }.unwrap_err();
    assert_eq!(err.driver_code(), Some(CUDA_ERROR_INVALID_CONTEXT));

    owner.set_current().unwrap();
    unsafe { sum.launch(&LaunchConfig::new(1, 32), &mut sum_args(32)) }.unwrap();
    assert_eq!(mock.launches().len(), 1);
}

#[test]
fn raw_launch_rejects_params_and_extra_together() {
    let (driver, _mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let func = module.function("sum").unwrap().as_raw();

    let mut args = sum_args(4);
    let mut buf = ArgBuffer::new();
    buf.push(4u32);
    let res = unsafe {
        driver.api().launch_kernel(
            func,
            Dim3::new(1, 1, 1),
            Dim3::new(4, 1, 1),
            0,
            0,
            Some(args.as_params()),
            Some(buf.as_extra()),
        )
    };
    assert_eq!(res, Err(CUDA_ERROR_INVALID_VALUE));
}

#[test]
fn raw_launch_of_unloaded_function_is_invalid_handle() {
    let (driver, _mock) = setup();
    let _ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let module = driver.load_module_data(ADD_PTX).unwrap();
    let func = module.function("sum").unwrap().as_raw();
    module.unload().unwrap();

    let mut params: Vec<*mut c_void> = Vec::new();
    let res = unsafe {
        driver.api().launch_kernel(
            func,
            Dim3::new(1, 1, 1),
            Dim3::new(1, 1, 1),
            0,
            0,
            Some(params.as_mut_slice()),
            None,
        )
    };
    assert_eq!(res, Err(CUDA_ERROR_INVALID_HANDLE));
}
