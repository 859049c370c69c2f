//! Execution contexts and batched deferred calls
//!
//! An [`ExecutionContext`] is one device's queue of deferred calls. The
//! registry never enqueues anything itself: it only takes the context's work
//! signal (to relay it), flushes the context when its pending flag is set, and
//! asks it to release bookkeeping on `cleanup`.

use std::fmt;

use tokio::sync::mpsc;

use crate::backend::hip_backend::{HipError, HipResult};
use crate::device::signal::{WorkReceiver, WorkSender};

/// One device's queue of deferred calls
pub trait ExecutionContext: Send {
    /// Hand over the receiver that fires whenever calls are queued.
    ///
    /// The receiver is handed out once; later calls return `None`.
    fn take_work_signal(&mut self) -> Option<WorkReceiver>;

    /// Execute every queued call and report an aggregated error if any failed
    fn flush(&mut self) -> HipResult<()>;

    /// Release ancillary host-side allocations made while batching
    fn cleanup(&mut self);

    /// Make this context the active one on the calling thread
    fn set_current(&self) -> HipResult<()>;

    /// Number of calls waiting for the next flush
    fn queued(&self) -> usize;
}

/// A call deferred until the next flush, run against the batch target `T`
pub type DeferredCall<T> = Box<dyn FnOnce(&T) -> HipResult<()> + Send>;

/// Host-side queue of deferred calls with a coalescing work signal
///
/// Context implementations embed one of these. `enqueue` raises the work
/// signal without blocking: if a signal is already outstanding the new call
/// rides on it. `run` executes everything queued and keeps the failures for
/// [`take_errors`](Self::take_errors).
pub struct BatchedQueue<T> {
    calls: Vec<DeferredCall<T>>,
    errors: Vec<HipError>,
    work_tx: WorkSender,
    work_rx: Option<WorkReceiver>,
}

impl<T> BatchedQueue<T> {
    pub fn new() -> Self {
        let (work_tx, work_rx) = mpsc::channel(1);
        Self {
            calls: Vec::new(),
            errors: Vec::new(),
            work_tx,
            work_rx: Some(work_rx),
        }
    }

    /// Queue a call and signal that work is available
    pub fn enqueue<F>(&mut self, call: F)
    where
        F: FnOnce(&T) -> HipResult<()> + Send + 'static,
    {
        self.calls.push(Box::new(call));
        // Full means a wake-up is already pending; closed means nobody relays.
        let _ = self.work_tx.try_send(());
    }

    pub fn take_work_signal(&mut self) -> Option<WorkReceiver> {
        self.work_rx.take()
    }

    /// Run every queued call against `target`, in enqueue order
    pub fn run(&mut self, target: &T) {
        for call in self.calls.drain(..) {
            if let Err(e) = call(target) {
                tracing::debug!(error = %e, "deferred call failed");
                self.errors.push(e);
            }
        }
    }

    /// Record a failure that happened outside a deferred call (e.g. a sync)
    pub fn record_error(&mut self, error: HipError) {
        self.errors.push(error);
    }

    /// Aggregated errors since the last call, clearing them
    pub fn take_errors(&mut self) -> HipResult<()> {
        HipError::aggregate(std::mem::take(&mut self.errors))
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop spare capacity and stale errors. Queued calls are kept.
    pub fn cleanup(&mut self) {
        self.calls.shrink_to_fit();
        self.errors.clear();
        self.errors.shrink_to_fit();
    }
}

impl<T> Default for BatchedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BatchedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedQueue")
            .field("queued", &self.calls.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_enqueue_raises_one_signal() {
        let mut queue: BatchedQueue<()> = BatchedQueue::new();
        let mut rx = queue.take_work_signal().unwrap();
        assert!(queue.take_work_signal().is_none());

        queue.enqueue(|_| Ok(()));
        queue.enqueue(|_| Ok(()));

        // Two calls, one coalesced wake-up
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_run_executes_in_order() {
        let mut queue: BatchedQueue<Arc<AtomicUsize>> = BatchedQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.enqueue(|c: &Arc<AtomicUsize>| {
            assert_eq!(c.fetch_add(1, Ordering::SeqCst), 0);
            Ok(())
        });
        queue.enqueue(|c: &Arc<AtomicUsize>| {
            assert_eq!(c.fetch_add(1, Ordering::SeqCst), 1);
            Ok(())
        });

        queue.run(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
        assert!(queue.take_errors().is_ok());
    }

    #[test]
    fn test_failures_are_aggregated() {
        let mut queue: BatchedQueue<()> = BatchedQueue::new();
        queue.enqueue(|_| Err(HipError::KernelLaunchFailed("a".into())));
        queue.enqueue(|_| Ok(()));
        queue.enqueue(|_| Err(HipError::KernelLaunchFailed("b".into())));

        queue.run(&());
        match queue.take_errors() {
            Err(HipError::FlushFailed { failed, .. }) => assert_eq!(failed, 2),
            other => panic!("expected FlushFailed, got {:?}", other),
        }
        // Errors are consumed
        assert!(queue.take_errors().is_ok());
    }

    #[test]
    fn test_cleanup_keeps_queued_calls() {
        let mut queue: BatchedQueue<()> = BatchedQueue::new();
        queue.enqueue(|_| Ok(()));
        queue.record_error(HipError::DeviceError("stale".into()));

        queue.cleanup();
        assert_eq!(queue.len(), 1);
        assert!(queue.take_errors().is_ok());
    }
}
