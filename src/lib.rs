// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v1.2
// Date Modified: 2026-10-17
// Author: Lukas Bower

//! Typed bindings to the CUDA driver API.
//!
//! The [`cuda::DriverApi`] trait is the raw call surface: one method per
//! native entry point, results returned as the driver's own `CUresult`.
//! [`cuda::Driver`] sits on top of it and hands out owned handles
//! ([`cuda::Context`], [`cuda::Module`], [`cuda::LinkState`]) that release
//! their driver object when dropped.

/// Process-wide runtime configuration
pub mod config;

/// Driver call surface, loaders and owned handles
pub mod cuda;

/// Runtime compilation through NVRTC
pub mod nvrtc;

/// Kernel compilation helpers built on the driver bindings
pub mod compiler;

pub use cuda::{
    ArgBuffer, Context, ContextFlags, ContextHandle, CudaError, Device, DevicePtr, Dim3, Driver,
    DriverApi, DriverError, DynamicDriver, Event, Function, Global, JitInputType, KernelArgs,
    LaunchConfig, LaunchRecord, LinkState, MockDriver, Module, PrimaryContext, Stream,
};
pub use nvrtc::{MockNvrtc, Nvrtc, NvrtcError, Program};
