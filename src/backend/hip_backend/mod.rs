//! ROCm/HIP backend
//!
//! `HipError` is always available; it is the error type every driver and
//! execution context reports. The runtime bindings are compiled only with the
//! `rocm` feature.

mod error;

#[cfg(feature = "rocm")]
mod context;
#[cfg(feature = "rocm")]
mod device;
#[cfg(feature = "rocm")]
mod driver;
#[cfg(feature = "rocm")]
mod ffi;
#[cfg(feature = "rocm")]
mod stream;

pub use error::{HipError, HipResult};

#[cfg(feature = "rocm")]
pub use context::{ensure_device, HipContext, HipQueueHandle};
#[cfg(feature = "rocm")]
pub use device::{get_error_string, HipDeviceProp};
#[cfg(feature = "rocm")]
pub use driver::HipDriver;
#[cfg(feature = "rocm")]
pub use stream::HipStream;
