//! HIP execution context
//!
//! **HIP device selection is per thread.** `hipSetDevice` only affects the
//! calling thread, so the current device is cached thread-locally and
//! [`ensure_device`] re-selects it only on mismatch.

use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread_local;

use crate::backend::hip_backend::device::get_error_string;
use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;
use crate::backend::hip_backend::stream::HipStream;
use crate::device::context::{BatchedQueue, ExecutionContext};
use crate::device::signal::WorkReceiver;

thread_local! {
    static THREAD_DEVICE_ID: Cell<i32> = const { Cell::new(-1) };
}

/// Select `device` on the calling thread unless it already is
pub fn ensure_device(device: i32) -> HipResult<()> {
    if THREAD_DEVICE_ID.with(Cell::get) == device {
        return Ok(());
    }

    let result = unsafe { ffi::hipSetDevice(device) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::DeviceError(format!(
            "hipSetDevice({}) failed: {}",
            device,
            get_error_string(result)
        )));
    }
    tracing::trace!(device, "hipSetDevice");
    THREAD_DEVICE_ID.with(|cell| cell.set(device));
    Ok(())
}

type SharedQueue = Arc<Mutex<BatchedQueue<HipStream>>>;

/// One device's stream plus its batched deferred calls
pub struct HipContext {
    device: i32,
    stream: HipStream,
    queue: SharedQueue,
}

impl HipContext {
    /// Create a stream on `device`. The device must already be selected.
    pub(crate) fn new(device: i32) -> HipResult<Self> {
        Ok(Self {
            device,
            stream: HipStream::new()?,
            queue: Arc::new(Mutex::new(BatchedQueue::new())),
        })
    }

    /// Enqueue side, for code that issues work on this device
    pub fn queue_handle(&self) -> HipQueueHandle {
        HipQueueHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn device(&self) -> i32 {
        self.device
    }
}

impl ExecutionContext for HipContext {
    fn take_work_signal(&mut self) -> Option<WorkReceiver> {
        self.queue.lock().ok()?.take_work_signal()
    }

    fn flush(&mut self) -> HipResult<()> {
        ensure_device(self.device)?;
        let mut queue = self.queue.lock()?;
        queue.run(&self.stream);
        if let Err(e) = self.stream.synchronize() {
            queue.record_error(e);
        }
        queue.take_errors()
    }

    fn cleanup(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.cleanup();
        }
    }

    fn set_current(&self) -> HipResult<()> {
        ensure_device(self.device)
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl fmt::Debug for HipContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HipContext")
            .field("device", &self.device)
            .field("stream", &self.stream.as_ptr())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Enqueue handle for a [`HipContext`]
#[derive(Clone)]
pub struct HipQueueHandle {
    queue: SharedQueue,
}

impl HipQueueHandle {
    /// Defer `call` until the context's next flush; raises its work signal
    pub fn enqueue<F>(&self, call: F) -> HipResult<()>
    where
        F: FnOnce(&HipStream) -> HipResult<()> + Send + 'static,
    {
        self.queue.lock()?.enqueue(call);
        Ok(())
    }
}
