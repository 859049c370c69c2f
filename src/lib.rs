//! rocmforge-exec - multi-device execution layer for AMD GPUs
//!
//! Discovers every visible accelerator, captures its launch limits, keeps one
//! execution context per device, fans per-device "work available" signals
//! into a single channel, pools device memory per size, and computes kernel
//! launch geometry for elementwise operations.
//!
//! The HIP runtime bindings are behind the `rocm` feature. Without it the
//! crate runs against [`device::SimDriver`].

#![allow(clippy::should_implement_trait)] // from_str helpers return Option

pub mod backend;
pub mod device;
pub mod logging;

pub use backend::{HipError, HipResult};
pub use device::{
    ArenaLookup, CapabilityProfile, DeviceDriver, DeviceId, DeviceMemory, DeviceRegistry,
    ExecutionContext, ExternalExecutor, KernelSources, LaunchGeometry, MemoryArena, PutOutcome,
    RegistryConfig, RegistryError, RegistryResult, RegistryState, SimDriver,
};
pub use logging::{init_logging_default, init_with_config, LogFormat, LogLevel, LoggingConfig};

#[cfg(feature = "rocm")]
pub use backend::hip_backend::HipDriver;
