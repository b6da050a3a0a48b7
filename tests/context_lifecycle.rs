// CLASSIFICATION: COMMUNITY
// Filename: context_lifecycle.rs v0.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use cudrv::cuda::types::status::*;
use cudrv::{ContextFlags, Driver, MockDriver};

fn mock_driver() -> (Driver, Arc<MockDriver>) {
    let mock = Arc::new(MockDriver::new().with_devices(2));
    let driver = Driver::with_api(mock.clone());
    driver.init(0).unwrap();
    (driver, mock)
}

#[test]
fn create_destroy_leaves_no_current_context() {
    let (driver, mock) = mock_driver();
    assert_eq!(driver.current_context().unwrap(), None);

    let ctx = driver
        .create_context(driver.device(0).unwrap(), ContextFlags::SCHED_BLOCKING_SYNC)
        .unwrap();
    assert_eq!(driver.current_context().unwrap(), Some(ctx.handle()));

    ctx.destroy().unwrap();
    assert_eq!(driver.current_context().unwrap(), None);
    assert_eq!(mock.live_contexts(), 0);
}

#[test]
fn set_current_switches_between_contexts() {
    let (driver, _mock) = mock_driver();
    let a = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let b = driver.create_context(driver.device(1).unwrap(), ContextFlags::empty()).unwrap();
    assert!(b.is_current().unwrap());

    // Replaces b at the top; a is still underneath.
    a.set_current().unwrap();
    assert!(a.is_current().unwrap());
    assert!(!b.is_current().unwrap());

    driver.set_current_context(None).unwrap();
    assert_eq!(driver.current_context().unwrap(), Some(a.handle()));
    driver.set_current_context(None).unwrap();
    assert_eq!(driver.current_context().unwrap(), None);

    // Popping an empty stack is not an error.
    driver.set_current_context(None).unwrap();
    b.set_current().unwrap();
    assert!(b.is_current().unwrap());
}

#[test]
fn destroying_nested_context_restores_outer() {
    let (driver, mock) = mock_driver();
    let dev = driver.device(0).unwrap();
    let outer = driver.create_context(dev, ContextFlags::empty()).unwrap();
    let inner = driver.create_context(dev, ContextFlags::empty()).unwrap();
    assert!(inner.is_current().unwrap());

    inner.destroy().unwrap();
    assert!(outer.is_current().unwrap());
    assert_eq!(mock.live_contexts(), 1);

    let link = driver.link().unwrap();
    link.destroy().unwrap();
}

#[test]
fn destroyed_context_stays_bound_on_other_threads() {
    let (driver, _mock) = mock_driver();
    let ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let handle = ctx.handle();

    let (bound_tx, bound_rx) = mpsc::channel();
    let (destroyed_tx, destroyed_rx) = mpsc::channel::<()>();
    let worker = driver.clone();
    let join = thread::spawn(move || {
        worker.set_current_context(Some(handle)).unwrap();
        bound_tx.send(()).unwrap();
        destroyed_rx.recv().unwrap();
        let still_bound = worker.current_context().unwrap();
        let link_err = worker.link().unwrap_err();
        let device_err = worker.current_device().unwrap_err();
        (still_bound, link_err.code(), device_err.code())
    });

    bound_rx.recv().unwrap();
    ctx.destroy().unwrap();
    assert_eq!(driver.current_context().unwrap(), None);
    destroyed_tx.send(()).unwrap();

    let (still_bound, link_code, device_code) = join.join().unwrap();
    assert_eq!(still_bound, Some(handle));
    assert_eq!(link_code, CUDA_ERROR_CONTEXT_IS_DESTROYED);
    assert_eq!(device_code, CUDA_ERROR_CONTEXT_IS_DESTROYED);
}

#[test]
fn destroying_a_non_current_context_leaves_stack_alone() {
    let (driver, _mock) = mock_driver();
    let dev = driver.device(0).unwrap();
    let local = driver.create_context(dev, ContextFlags::empty()).unwrap();
    let other = driver.create_context(dev, ContextFlags::empty()).unwrap();
    local.set_current().unwrap();

    other.destroy().unwrap();
    assert!(local.is_current().unwrap());
}

#[test]
fn current_context_is_per_thread() {
    let (driver, _mock) = mock_driver();
    let ctx = driver.create_context(driver.device(0).unwrap(), ContextFlags::empty()).unwrap();
    let handle = ctx.handle();

    let worker = driver.clone();
    let seen = thread::spawn(move || {
        let before = worker.current_context().unwrap();
        worker.set_current_context(Some(handle)).unwrap();
        let after = worker.current_context().unwrap();
        worker.set_current_context(None).unwrap();
        (before, after)
    })
    .join()
    .unwrap();

    assert_eq!(seen, (None, Some(handle)));
    assert_eq!(driver.current_context().unwrap(), Some(handle));
}

#[test]
fn invalid_device_and_flags_are_rejected() {
    let (driver, _mock) = mock_driver();
    let err = driver.device(5).unwrap_err();
    assert_eq!(err.code(), CUDA_ERROR_INVALID_DEVICE);

    let raw = driver.api().ctx_create(0x8000, 0).unwrap_err();
    assert_eq!(raw, CUDA_ERROR_INVALID_VALUE);
}

#[test]
fn destroying_a_primary_context_is_refused() {
    let (driver, mock) = mock_driver();
    let dev = driver.device(0).unwrap();
    let primary = driver.retain_primary_context(dev).unwrap();
    let err = driver.api().ctx_destroy(primary.handle().as_raw()).unwrap_err();
    assert_eq!(err, CUDA_ERROR_INVALID_CONTEXT);
    drop(primary);
    assert_eq!(mock.live_contexts(), 0);
}

#[test]
fn releasing_unretained_primary_context_fails() {
    let (driver, _mock) = mock_driver();
    let err = driver.primary_context_release(driver.device(1).unwrap()).unwrap_err();
    assert_eq!(err.code(), CUDA_ERROR_INVALID_CONTEXT);
    assert_eq!(err.to_string(), "CUDA_ERROR_INVALID_CONTEXT: invalid device context");
}

#[test]
fn uninitialised_driver_reports_not_initialized() {
    let driver = Driver::with_api(Arc::new(MockDriver::new()));
    let err = driver.current_context().unwrap_err();
    assert_eq!(err.code(), CUDA_ERROR_NOT_INITIALIZED);
}
