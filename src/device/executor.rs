//! External executor surface
//!
//! The execution loop only needs three things from whatever runs device work:
//! flush pending work, ask whether a kernel exists, and know whether an
//! external executor is present at all. [`NoopExecutor`] stands in when no
//! accelerator is configured; [`DeviceRegistry`] is the multi-queue variant;
//! [`AuxiliaryExecutor`] drives a lone auxiliary backend as a single queue.

use tokio::runtime::Handle;

use crate::device::auxiliary::AuxiliaryBackend;
use crate::device::error::{RegistryError, RegistryResult};
use crate::device::registry::DeviceRegistry;
use crate::device::signal::{PendingFlag, WorkReceiver, WorkSignalHub};

/// Capability interface the execution loop uses to drive device work
pub trait ExternalExecutor {
    /// Flush whatever work is pending
    fn do_work(&mut self) -> RegistryResult<()>;

    /// Whether a kernel called `name` is available
    fn has_func(&self, name: &str) -> bool;

    /// `false` only for the absent executor
    fn is_external(&self) -> bool {
        true
    }
}

/// Executor used when no accelerator is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

impl ExternalExecutor for NoopExecutor {
    fn do_work(&mut self) -> RegistryResult<()> {
        Ok(())
    }

    fn has_func(&self, _name: &str) -> bool {
        false
    }

    fn is_external(&self) -> bool {
        false
    }
}

impl ExternalExecutor for DeviceRegistry {
    fn do_work(&mut self) -> RegistryResult<()> {
        DeviceRegistry::do_work(self)
    }

    fn has_func(&self, name: &str) -> bool {
        DeviceRegistry::has_func(self, name)
    }
}

/// An auxiliary backend on its own: one queue, one relay
pub struct AuxiliaryExecutor {
    backend: Box<dyn AuxiliaryBackend>,
    capacity: usize,
    hub: WorkSignalHub,
    pending: PendingFlag,
    // Handed back by the relay on shutdown, reused by `restart`
    parked: Option<WorkReceiver>,
}

impl AuxiliaryExecutor {
    /// Wrap `backend` and start its relay on `runtime`
    pub fn new(backend: Box<dyn AuxiliaryBackend>, capacity: usize, runtime: Handle) -> Self {
        let pending = PendingFlag::new();
        let hub = WorkSignalHub::new(capacity, runtime).with_auxiliary_pending(pending.clone());
        let mut executor = Self {
            backend,
            capacity,
            hub,
            pending,
            parked: None,
        };
        executor.start_relay();
        executor
    }

    fn start_relay(&mut self) {
        match self.parked.take().or_else(|| self.backend.take_work_signal()) {
            Some(source) => self.hub.spawn_auxiliary_relay(source),
            None => tracing::warn!(backend = self.backend.name(), "auxiliary backend has no work signal"),
        }
        if self.pending.is_set() {
            self.hub.try_signal();
        }
    }

    /// Wait until the backend reports work; `None` once shut down
    pub async fn wait_for_work(&mut self) -> Option<()> {
        self.hub.recv().await
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending.is_set()
    }

    pub fn is_running(&self) -> bool {
        !self.hub.is_closed()
    }

    /// Stop the relay, keeping the backend's work signal for [`restart`](Self::restart)
    pub async fn shutdown(&mut self) {
        if let Some(source) = self.hub.shutdown().await {
            self.parked = Some(source);
        }
    }

    /// Start a new relay on `runtime` after [`shutdown`](Self::shutdown).
    ///
    /// No-op while the relay is still running.
    pub fn restart(&mut self, runtime: Handle) {
        if self.is_running() {
            return;
        }
        self.hub = WorkSignalHub::new(self.capacity, runtime).with_auxiliary_pending(self.pending.clone());
        self.start_relay();
    }
}

impl ExternalExecutor for AuxiliaryExecutor {
    fn do_work(&mut self) -> RegistryResult<()> {
        let pending = &self.pending;
        if !pending.take() {
            return Ok(());
        }
        self.backend.flush().map_err(|e| {
            pending.set();
            tracing::error!(backend = self.backend.name(), error = %e, "auxiliary flush failed");
            RegistryError::AuxiliaryFlushFailed(e)
        })
    }

    // BLAS routines are not looked up by kernel name.
    fn has_func(&self, _name: &str) -> bool {
        false
    }
}
