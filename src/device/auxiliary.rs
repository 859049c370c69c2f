//! Optional auxiliary (BLAS) backend
//!
//! A linear-algebra library that batches its own calls can share the
//! registry's signal hub. Only two things are consumed from it: the channel
//! that fires when it has batched work, and `flush`.

use crate::backend::hip_backend::HipResult;
use crate::device::signal::WorkReceiver;

/// A secondary compute backend that batches calls and flushes on request
pub trait AuxiliaryBackend: Send {
    /// Hand over the "work available" receiver; `None` after the first call
    fn take_work_signal(&mut self) -> Option<WorkReceiver>;

    /// Execute everything the backend has batched
    fn flush(&mut self) -> HipResult<()>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "blas"
    }
}
