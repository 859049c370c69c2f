//! Device driver interface
//!
//! The registry talks to hardware only through [`DeviceDriver`]. The HIP
//! runtime implements it behind the `rocm` feature
//! ([`HipDriver`](crate::backend::hip_backend::HipDriver)); [`SimDriver`](crate::device::SimDriver)
//! implements it in-process.

use crate::backend::hip_backend::HipResult;
use crate::device::config::SchedulingMode;
use crate::device::context::ExecutionContext;
use crate::device::profile::{DeviceAttributes, DeviceId};

/// Free and total device memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: u64,
    pub total: u64,
}

/// Capability queries and context creation for a family of devices
pub trait DeviceDriver: Send + Sync {
    /// Number of devices visible to this driver
    fn device_count(&self) -> HipResult<usize>;

    /// Launch limits and identification for `device`
    fn attributes(&self, device: DeviceId) -> HipResult<DeviceAttributes>;

    /// Current free/total memory on `device`
    fn mem_info(&self, device: DeviceId) -> HipResult<MemoryInfo>;

    /// Create an execution context on `device`.
    ///
    /// Must return [`HipError::OutOfMemory`](crate::backend::hip_backend::HipError::OutOfMemory)
    /// when the failure is memory exhaustion.
    fn make_context(
        &self,
        device: DeviceId,
        scheduling: SchedulingMode,
    ) -> HipResult<Box<dyn ExecutionContext>>;

    /// Short driver name for logs
    fn name(&self) -> &str;
}
