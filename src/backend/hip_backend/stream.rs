//! HIP stream wrapper

use std::ptr;

use crate::backend::hip_backend::device::get_error_string;
use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;

// SAFETY: the stream handle is only used through the owning context, which
// the registry never shares between threads concurrently.
// NOTE: not Clone; two owners would destroy the stream twice.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// Owned HIP stream; deferred calls of a context are issued on it
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    /// Create a stream on the current device
    pub fn new() -> HipResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        tracing::trace!(result, ?stream, "hipStreamCreate");

        match result {
            ffi::HIP_SUCCESS if !stream.is_null() => Ok(HipStream { stream }),
            ffi::HIP_SUCCESS => Err(HipError::ContextCreationFailed(
                "hipStreamCreate returned null pointer".to_string(),
            )),
            ffi::HIP_ERROR_OUT_OF_MEMORY => Err(HipError::OutOfMemory),
            code => Err(HipError::ContextCreationFailed(format!(
                "Failed to create HIP stream: {}",
                get_error_string(code)
            ))),
        }
    }

    /// Block until everything issued on the stream has completed
    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "Stream synchronization failed: {}",
                get_error_string(result)
            )));
        }
        Ok(())
    }

    /// Raw stream pointer for kernel launches and BLAS handles
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
