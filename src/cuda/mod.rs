// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! CUDA driver bindings.

pub mod api;
pub mod context;
pub mod driver;
pub mod error;
pub mod launch;
pub mod library;
pub mod link;
pub mod mock;
pub mod module;
pub mod types;

pub use api::{CuResult, DriverApi};
pub use context::{Context, PrimaryContext};
pub use driver::{Driver, DriverVersion};
pub use error::{CudaError, DriverError};
pub use launch::{ArgBuffer, KernelArg, KernelArgs, LaunchConfig};
pub use library::DynamicDriver;
pub use link::LinkState;
pub use mock::{LaunchRecord, MockDriver};
pub use module::{Function, Global, Module};
pub use types::{
    ContextFlags, ContextHandle, CUresult, Device, DevicePtr, Dim3, Event, JitInputType, Stream,
};
