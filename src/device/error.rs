//! Registry error types

use thiserror::Error;

use crate::backend::hip_backend::HipError;
use crate::device::profile::DeviceId;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No devices found")]
    NoDevices,
    #[error("Failed to get number of devices: {0}")]
    DeviceCountFailed(#[source] HipError),
    #[error("Failed to initialize {device}: {source}")]
    DeviceInitFailed {
        device: DeviceId,
        #[source]
        source: HipError,
    },
    #[error("No async runtime available to run signal relays")]
    NoRuntime,
    #[error("Device registry is not ready")]
    NotReady,
    #[error("Flush failed on {device}: {source}")]
    FlushFailed {
        device: DeviceId,
        #[source]
        source: HipError,
    },
    #[error("Auxiliary backend flush failed: {0}")]
    AuxiliaryFlushFailed(#[source] HipError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl RegistryError {
    /// Underlying driver error, if any
    pub fn hip_error(&self) -> Option<&HipError> {
        match self {
            RegistryError::DeviceCountFailed(e)
            | RegistryError::AuxiliaryFlushFailed(e)
            | RegistryError::DeviceInitFailed { source: e, .. }
            | RegistryError::FlushFailed { source: e, .. } => Some(e),
            RegistryError::NoDevices | RegistryError::NoRuntime | RegistryError::NotReady => None,
        }
    }
}
