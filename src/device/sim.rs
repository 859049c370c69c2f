//! In-process simulated devices
//!
//! [`SimDriver`] implements [`DeviceDriver`] without any GPU: each simulated
//! device has a fixed capability profile, and individual devices can be told
//! to fail context creation or attribute queries. Deferred calls queued
//! through a [`SimQueueHandle`] run on the host when the registry flushes.
//!
//! Useful on machines without ROCm and as the fixture for the registry tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::hip_backend::{HipError, HipResult};
use crate::device::auxiliary::AuxiliaryBackend;
use crate::device::config::SchedulingMode;
use crate::device::context::{BatchedQueue, ExecutionContext};
use crate::device::driver::{DeviceDriver, MemoryInfo};
use crate::device::profile::{DeviceAttributes, DeviceId};
use crate::device::signal::WorkReceiver;

const NO_DEVICE: usize = usize::MAX;

/// Batch target for simulated deferred calls
#[derive(Debug)]
pub struct SimStream {
    device: DeviceId,
}

impl SimStream {
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

type SharedQueue = Arc<Mutex<BatchedQueue<SimStream>>>;

/// Enqueue side of a simulated context, kept by tests and host code
#[derive(Clone)]
pub struct SimQueueHandle {
    queue: SharedQueue,
}

impl SimQueueHandle {
    /// Queue a deferred call; raises the context's work signal
    pub fn enqueue<F>(&self, call: F) -> HipResult<()>
    where
        F: FnOnce(&SimStream) -> HipResult<()> + Send + 'static,
    {
        self.queue.lock()?.enqueue(call);
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl fmt::Debug for SimQueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimQueueHandle")
            .field("queued", &self.queued())
            .finish()
    }
}

/// Configuration of one simulated device
#[derive(Debug, Clone)]
pub struct SimDevice {
    attributes: DeviceAttributes,
    memory: MemoryInfo,
    context_failure: Option<HipError>,
    attribute_failure: Option<HipError>,
}

impl SimDevice {
    /// An RDNA3-like device with 16 GiB of memory
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            attributes: DeviceAttributes {
                name: name.into(),
                compute_units: 84,
                warp_size: 32,
                max_threads_per_block: 1024,
                max_grid_dim: [2147483647, 65535, 65535],
                max_block_dim: [1024, 1024, 1024],
            },
            memory: MemoryInfo {
                free: 15 << 30,
                total: 16 << 30,
            },
            context_failure: None,
            attribute_failure: None,
        }
    }

    pub fn with_attributes(mut self, attributes: DeviceAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_max_threads_per_block(mut self, max_threads: u32) -> Self {
        self.attributes.max_threads_per_block = max_threads;
        self
    }

    pub fn with_max_grid_dim(mut self, grid: [u32; 3]) -> Self {
        self.attributes.max_grid_dim = grid;
        self
    }

    pub fn with_memory(mut self, free: u64, total: u64) -> Self {
        self.memory = MemoryInfo { free, total };
        self
    }

    /// Context creation on this device fails with `error`
    pub fn failing_context(mut self, error: HipError) -> Self {
        self.context_failure = Some(error);
        self
    }

    /// Attribute queries on this device fail with `error`
    pub fn failing_attributes(mut self, error: HipError) -> Self {
        self.attribute_failure = Some(error);
        self
    }
}

/// A [`DeviceDriver`] backed by simulated devices
#[derive(Debug)]
pub struct SimDriver {
    devices: Vec<SimDevice>,
    count_failure: Option<HipError>,
    queues: Mutex<HashMap<usize, SharedQueue>>,
    current: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
    contexts_created: AtomicUsize,
    mem_info_calls: AtomicUsize,
}

impl SimDriver {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            count_failure: None,
            queues: Mutex::new(HashMap::new()),
            current: Arc::new(AtomicUsize::new(NO_DEVICE)),
            cleanups: Arc::new(AtomicUsize::new(0)),
            contexts_created: AtomicUsize::new(0),
            mem_info_calls: AtomicUsize::new(0),
        }
    }

    /// `n` identical default devices
    pub fn with_devices(n: usize) -> Self {
        Self::new((0..n).map(|i| SimDevice::new(format!("sim{}", i))).collect())
    }

    /// The device count query itself fails with `error`
    pub fn failing_count(mut self, error: HipError) -> Self {
        self.count_failure = Some(error);
        self
    }

    /// Enqueue handle for the most recent context made on `device`
    pub fn queue(&self, device: DeviceId) -> Option<SimQueueHandle> {
        let queues = self.queues.lock().ok()?;
        queues
            .get(&device.index())
            .map(|queue| SimQueueHandle { queue: Arc::clone(queue) })
    }

    /// Device most recently made current, if any
    pub fn current_device(&self) -> Option<DeviceId> {
        match self.current.load(Ordering::Acquire) {
            NO_DEVICE => None,
            index => Some(DeviceId(index)),
        }
    }

    /// Total `cleanup` calls across all contexts
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::Acquire)
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::Acquire)
    }

    /// Total `mem_info` queries across all devices
    pub fn mem_info_calls(&self) -> usize {
        self.mem_info_calls.load(Ordering::Acquire)
    }

    fn device(&self, device: DeviceId) -> HipResult<&SimDevice> {
        self.devices
            .get(device.index())
            .ok_or(HipError::DeviceNotFound(device.index()))
    }
}

impl DeviceDriver for SimDriver {
    fn device_count(&self) -> HipResult<usize> {
        match &self.count_failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.devices.len()),
        }
    }

    fn attributes(&self, device: DeviceId) -> HipResult<DeviceAttributes> {
        let sim = self.device(device)?;
        match &sim.attribute_failure {
            Some(e) => Err(e.clone()),
            None => Ok(sim.attributes.clone()),
        }
    }

    fn mem_info(&self, device: DeviceId) -> HipResult<MemoryInfo> {
        self.mem_info_calls.fetch_add(1, Ordering::AcqRel);
        Ok(self.device(device)?.memory)
    }

    fn make_context(
        &self,
        device: DeviceId,
        scheduling: SchedulingMode,
    ) -> HipResult<Box<dyn ExecutionContext>> {
        let sim = self.device(device)?;
        if let Some(e) = &sim.context_failure {
            return Err(e.clone());
        }

        let queue: SharedQueue = Arc::new(Mutex::new(BatchedQueue::new()));
        self.queues.lock()?.insert(device.index(), Arc::clone(&queue));
        self.contexts_created.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(device = device.index(), ?scheduling, "simulated context created");

        Ok(Box::new(SimContext {
            stream: SimStream { device },
            queue,
            current: Arc::clone(&self.current),
            cleanups: Arc::clone(&self.cleanups),
        }))
    }

    fn name(&self) -> &str {
        "sim"
    }
}

/// Execution context of a simulated device
pub struct SimContext {
    stream: SimStream,
    queue: SharedQueue,
    current: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl ExecutionContext for SimContext {
    fn take_work_signal(&mut self) -> Option<WorkReceiver> {
        self.queue.lock().ok()?.take_work_signal()
    }

    // Calls run with the queue locked: a deferred call must not enqueue onto
    // its own context.
    fn flush(&mut self) -> HipResult<()> {
        let mut queue = self.queue.lock()?;
        queue.run(&self.stream);
        queue.take_errors()
    }

    fn cleanup(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.cleanup();
        }
        self.cleanups.fetch_add(1, Ordering::AcqRel);
    }

    fn set_current(&self) -> HipResult<()> {
        self.current.store(self.stream.device.index(), Ordering::Release);
        Ok(())
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// A simulated auxiliary backend with its own batched queue
#[derive(Default)]
pub struct SimBlas {
    queue: Arc<Mutex<BatchedQueue<()>>>,
    flushes: Arc<AtomicUsize>,
}

impl SimBlas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue handle that stays valid after the backend is moved into a registry
    pub fn handle(&self) -> SimBlasHandle {
        SimBlasHandle {
            queue: Arc::clone(&self.queue),
            flushes: Arc::clone(&self.flushes),
        }
    }
}

impl AuxiliaryBackend for SimBlas {
    fn take_work_signal(&mut self) -> Option<WorkReceiver> {
        self.queue.lock().ok()?.take_work_signal()
    }

    fn flush(&mut self) -> HipResult<()> {
        let mut queue = self.queue.lock()?;
        queue.run(&());
        self.flushes.fetch_add(1, Ordering::AcqRel);
        queue.take_errors()
    }

    fn name(&self) -> &str {
        "sim-blas"
    }
}

/// Enqueue side of a [`SimBlas`]
#[derive(Clone)]
pub struct SimBlasHandle {
    queue: Arc<Mutex<BatchedQueue<()>>>,
    flushes: Arc<AtomicUsize>,
}

impl SimBlasHandle {
    pub fn enqueue<F>(&self, call: F) -> HipResult<()>
    where
        F: FnOnce(&()) -> HipResult<()> + Send + 'static,
    {
        self.queue.lock()?.enqueue(call);
        Ok(())
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }
}
