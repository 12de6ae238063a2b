//! gpu-debug: call-site checked wrappers around the CUDA runtime.
//!
//! - [`checked`]: allocation, copy, memset and stream wrappers that report
//!   failures with the caller's file and line, then apply a [`FailurePolicy`]
//! - [`device_prop`]: enumerates devices and prints their capabilities
//! - [`runtime`]: the native-call seam, with a simulated runtime for
//!   CPU-only builds and the real CUDA runtime behind the `cuda` feature
//! - [`config`]: CLI arguments and JSON configuration

pub mod checked;
pub mod config;
pub mod device_prop;
pub mod runtime;

pub use checked::report::{Dim3, MemorySink};
pub use checked::{CallSite, CheckError, CheckResult, DebugContext, FailurePolicy};
pub use device_prop::{DevicePropReporter, ReporterError};
pub use runtime::mock::MockRuntime;
pub use runtime::{
    Copy2d, DevicePtr, DeviceProperties, HostPtr, Runtime, RuntimeError, StreamHandle, Symbol,
    SymbolSource,
};

#[cfg(feature = "cuda")]
pub use runtime::cuda::CudaRuntime;
