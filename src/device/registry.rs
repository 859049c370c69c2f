//! Device registry: enumeration, capability profiles and lifecycle
//!
//! The registry owns everything that is per device: the capability profile,
//! the execution context, and the pending-work flag its relay sets. It also
//! owns the memory arena, the signal hub and the kernel tables.
//!
//! Initialization is all-or-nothing. If any device fails, everything built so
//! far is dropped, the hub is closed and the registry ends up `Disabled`. It
//! never runs with a partial device set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::backend::hip_backend::{HipError, HipResult};
use crate::device::arena::{ArenaLookup, DeviceMemory, MemoryArena, PutOutcome};
use crate::device::auxiliary::AuxiliaryBackend;
use crate::device::config::RegistryConfig;
use crate::device::context::ExecutionContext;
use crate::device::driver::DeviceDriver;
use crate::device::error::{RegistryError, RegistryResult};
use crate::device::kernels::{FunctionHandle, KernelSources, KernelTables, ModuleHandle};
use crate::device::launch::{self, LaunchGeometry};
use crate::device::profile::{CapabilityProfile, DeviceId};
use crate::device::signal::{PendingFlag, WorkReceiver, WorkSignalHub};

/// Lifecycle state of a [`DeviceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Initializing,
    Ready,
    /// Initialization failed; the registry is inert until the next `init`
    Disabled,
}

/// Everything the registry keeps for one device
pub struct DeviceRecord {
    profile: CapabilityProfile,
    context: Box<dyn ExecutionContext>,
    pending: PendingFlag,
}

impl DeviceRecord {
    pub fn id(&self) -> DeviceId {
        self.profile.device()
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        self.context.as_ref()
    }

    /// Whether the relay has seen work since the last flush
    pub fn has_pending_work(&self) -> bool {
        self.pending.is_set()
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("device", &self.id())
            .field("queued", &self.context.queued())
            .field("pending", &self.pending.is_set())
            .finish()
    }
}

/// Per-device execution state for every visible accelerator
pub struct DeviceRegistry {
    driver: Arc<dyn DeviceDriver>,
    config: RegistryConfig,
    kernel_sources: KernelSources,
    auxiliary: Option<Box<dyn AuxiliaryBackend>>,
    // Outlive any one hub so auxiliary work survives teardown and re-init.
    auxiliary_pending: PendingFlag,
    auxiliary_source: Option<WorkReceiver>,

    state: RegistryState,
    devices: Vec<DeviceRecord>,
    arena: MemoryArena<DeviceMemory>,
    hub: Option<WorkSignalHub>,
    tables: KernelTables,
    active_device: Option<DeviceId>,
}

impl DeviceRegistry {
    /// Create an uninitialized registry
    ///
    /// `kernel_sources` is every kernel the module loader should make
    /// available; it is fixed once the registry exists.
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        config: RegistryConfig,
        kernel_sources: KernelSources,
    ) -> Self {
        Self {
            driver,
            config,
            kernel_sources,
            auxiliary: None,
            auxiliary_pending: PendingFlag::new(),
            auxiliary_source: None,
            state: RegistryState::Uninitialized,
            devices: Vec::new(),
            arena: MemoryArena::new(0),
            hub: None,
            tables: KernelTables::new(),
            active_device: None,
        }
    }

    /// Attach an auxiliary backend whose work signal shares the hub
    pub fn with_auxiliary(mut self, backend: Box<dyn AuxiliaryBackend>) -> Self {
        self.auxiliary = Some(backend);
        self
    }

    /// Query every device and bring the registry to `Ready`.
    ///
    /// Idempotent once `Ready`. Must be called from within a tokio runtime;
    /// relay tasks are spawned on it. Driver calls block the caller.
    pub fn init(&mut self) -> RegistryResult<()> {
        if self.state == RegistryState::Ready {
            return Ok(());
        }
        self.state = RegistryState::Initializing;

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return self.init_fail(RegistryError::NoRuntime),
        };

        let count = match self.driver.device_count() {
            Ok(0) => {
                tracing::warn!(driver = self.driver.name(), "No devices found");
                return self.init_fail(RegistryError::NoDevices);
            }
            Ok(count) => count,
            Err(e) => {
                tracing::error!(driver = self.driver.name(), error = %e, "Failed to get number of devices");
                return self.init_fail(RegistryError::DeviceCountFailed(e));
            }
        };

        let mut hub = WorkSignalHub::new(self.config.signal_capacity, runtime)
            .with_auxiliary_pending(self.auxiliary_pending.clone());
        let mut devices = Vec::with_capacity(count);

        for index in 0..count {
            let device = DeviceId(index);
            let mut record = match self.init_device(device) {
                Ok(record) => record,
                Err(source) => {
                    // Relays already started for earlier devices stop with the hub.
                    hub.close();
                    drop(devices);
                    return self.init_fail(RegistryError::DeviceInitFailed { device, source });
                }
            };

            match record.context.take_work_signal() {
                Some(source) => hub.spawn_device_relay(device, source, record.pending.clone()),
                None => tracing::warn!(device = index, "context has no work signal, flushes must be driven manually"),
            }
            devices.push(record);
        }

        if let Err(source) = devices[0].context.set_current() {
            hub.close();
            drop(devices);
            return self.init_fail(RegistryError::DeviceInitFailed {
                device: DeviceId(0),
                source,
            });
        }

        if let Some(auxiliary) = self.auxiliary.as_mut() {
            // A source parked by teardown takes precedence over a fresh one.
            match self
                .auxiliary_source
                .take()
                .or_else(|| auxiliary.take_work_signal())
            {
                Some(source) => hub.spawn_auxiliary_relay(source),
                None => tracing::warn!(
                    backend = auxiliary.name(),
                    "auxiliary backend has no work signal, no auxiliary relay started"
                ),
            }
            // Work flagged before a teardown still needs a wake-up.
            if self.auxiliary_pending.is_set() {
                hub.try_signal();
            }
        }

        self.arena = MemoryArena::new(count);
        self.tables = KernelTables::new();
        self.hub = Some(hub);
        self.devices = devices;
        self.active_device = Some(DeviceId(0));
        self.state = RegistryState::Ready;

        tracing::info!(
            driver = self.driver.name(),
            devices = count,
            kernels = self.kernel_sources.len(),
            "Device registry initialized"
        );
        for record in &self.devices {
            tracing::debug!(profile = %record.profile, "device profile");
        }
        Ok(())
    }

    /// Acquire a context on `device` and capture its profile
    fn init_device(&self, device: DeviceId) -> HipResult<DeviceRecord> {
        let context = match self.driver.make_context(device, self.config.scheduling) {
            Ok(context) => context,
            Err(HipError::OutOfMemory) => {
                match self.driver.mem_info(device) {
                    Ok(info) => tracing::error!(
                        device = device.index(),
                        free = info.free,
                        total = info.total,
                        "Out of memory while creating context"
                    ),
                    Err(e) => tracing::error!(
                        device = device.index(),
                        error = %e,
                        "Out of memory while creating context; mem info unavailable"
                    ),
                }
                return Err(HipError::OutOfMemory);
            }
            Err(e) => {
                tracing::error!(device = device.index(), error = %e, "Failed to make context");
                return Err(e);
            }
        };

        let attributes = self.driver.attributes(device).map_err(|e| {
            tracing::error!(device = device.index(), error = %e, "Failed to get attributes");
            e
        })?;

        let memory = self.driver.mem_info(device).map_err(|e| {
            tracing::error!(device = device.index(), error = %e, "Failed to get free and total memory");
            e
        })?;

        Ok(DeviceRecord {
            profile: CapabilityProfile::new(device, attributes, memory.free, memory.total),
            context,
            pending: PendingFlag::new(),
        })
    }

    /// Revert to an inert state after a failed `init`
    fn init_fail(&mut self, error: RegistryError) -> RegistryResult<()> {
        tracing::error!(error = %error, "Device registry initialization failed, registry disabled");

        self.devices.clear();
        self.arena = MemoryArena::new(0);
        self.tables = KernelTables::new();
        if let Some(mut hub) = self.hub.take() {
            hub.close();
        }
        self.active_device = None;
        self.state = RegistryState::Disabled;
        Err(error)
    }

    /// Release per-context batching allocations. Lifecycle state is unchanged.
    pub fn cleanup(&mut self) {
        for record in &mut self.devices {
            record.context.cleanup();
        }
    }

    /// Stop every relay and drop all per-device state.
    ///
    /// The registry returns to `Uninitialized`. Blocks still pooled in the
    /// arena are handed back so the caller can free them. The auxiliary
    /// backend's work signal is kept for the next `init`.
    pub async fn teardown(&mut self) -> Vec<(DeviceId, usize, DeviceMemory)> {
        if let Some(mut hub) = self.hub.take() {
            if let Some(source) = hub.shutdown().await {
                self.auxiliary_source = Some(source);
            }
        }

        let pooled = self.arena.drain_all();
        if !pooled.is_empty() {
            tracing::debug!(blocks = pooled.len(), "returning pooled blocks to caller");
        }

        self.devices.clear();
        self.arena = MemoryArena::new(0);
        self.tables = KernelTables::new();
        self.active_device = None;
        self.state = RegistryState::Uninitialized;
        pooled
    }

    /// Flush every device with pending work, then the auxiliary backend.
    ///
    /// Stops at the first device that fails. That device and every device
    /// after it keep their pending flag, so the next call retries them.
    pub fn do_work(&mut self) -> RegistryResult<()> {
        if self.state != RegistryState::Ready {
            return Err(RegistryError::NotReady);
        }

        for record in &mut self.devices {
            if !record.pending.take() {
                continue;
            }
            if let Err(source) = record.context.flush() {
                record.pending.set();
                let device = record.profile.device();
                tracing::error!(device = device.index(), error = %source, "flush failed");
                return Err(RegistryError::FlushFailed { device, source });
            }
        }

        if let Some(auxiliary) = self.auxiliary.as_mut() {
            let pending = &self.auxiliary_pending;
            if pending.take() {
                if let Err(e) = auxiliary.flush() {
                    pending.set();
                    tracing::error!(backend = auxiliary.name(), error = %e, "auxiliary flush failed");
                    return Err(RegistryError::AuxiliaryFlushFailed(e));
                }
            }
        }

        Ok(())
    }

    /// Wait until some device or the auxiliary backend reports work.
    ///
    /// Returns `None` when the registry has no open hub.
    pub async fn wait_for_work(&mut self) -> Option<()> {
        self.hub.as_mut()?.recv().await
    }

    /// Non-blocking [`wait_for_work`](Self::wait_for_work)
    pub fn try_wait_for_work(&mut self) -> Option<()> {
        self.hub.as_mut()?.try_recv()
    }

    /// Wake the consumer without any device work
    pub async fn signal(&self) -> bool {
        match &self.hub {
            Some(hub) => hub.signal().await,
            None => false,
        }
    }

    /// The signal hub, present only while `Ready`.
    ///
    /// Read-only: the hub is closed only through `teardown` or a failed `init`.
    pub fn work_available(&self) -> Option<&WorkSignalHub> {
        self.hub.as_ref()
    }

    /// Whether the auxiliary backend has work waiting for `do_work`
    pub fn has_auxiliary_work(&self) -> bool {
        self.auxiliary_pending.is_set()
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == RegistryState::Ready
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn active_device(&self) -> Option<DeviceId> {
        self.active_device
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Execution contexts in device order
    pub fn contexts(&self) -> impl Iterator<Item = &dyn ExecutionContext> {
        self.devices.iter().map(DeviceRecord::context)
    }

    pub fn profile(&self, device: DeviceId) -> Option<&CapabilityProfile> {
        self.devices.get(device.index()).map(DeviceRecord::profile)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &CapabilityProfile> {
        self.devices.iter().map(DeviceRecord::profile)
    }

    /// Launch geometry for `n` elementwise operations on `device`
    pub fn elem_grid_size(&self, n: usize, device: DeviceId) -> Option<LaunchGeometry> {
        self.profile(device)
            .map(|profile| launch::elem_grid_size(n, profile))
    }

    pub fn arena(&self) -> &MemoryArena<DeviceMemory> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut MemoryArena<DeviceMemory> {
        &mut self.arena
    }

    /// Take a pooled block; see [`MemoryArena::get`]
    pub fn get(&mut self, device: DeviceId, size: usize) -> ArenaLookup<DeviceMemory> {
        self.arena.get(device, size)
    }

    /// Return a block to its pool; see [`MemoryArena::put`]
    pub fn put(&mut self, device: DeviceId, memory: DeviceMemory, size: usize) -> PutOutcome<DeviceMemory> {
        self.arena.put(device, memory, size)
    }

    pub fn kernel_sources(&self) -> &KernelSources {
        &self.kernel_sources
    }

    pub fn register_module(&mut self, name: impl Into<String>, per_device: Vec<ModuleHandle>) {
        self.tables.insert_module(name, per_device);
    }

    pub fn register_function(&mut self, name: impl Into<String>, per_device: Vec<FunctionHandle>) {
        self.tables.insert_function(name, per_device);
    }

    /// Whether a kernel with this name has been loaded
    ///
    /// BLAS routines are never reported here even when the auxiliary backend
    /// provides them.
    pub fn has_func(&self, name: &str) -> bool {
        self.tables.has_func(name)
    }

    pub fn kernel_tables(&self) -> &KernelTables {
        &self.tables
    }

    pub fn functions(&self) -> &HashMap<String, Vec<FunctionHandle>> {
        self.tables.functions()
    }

    pub fn modules(&self) -> &HashMap<String, Vec<ModuleHandle>> {
        self.tables.modules()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("driver", &self.driver.name())
            .field("state", &self.state)
            .field("devices", &self.devices)
            .field("auxiliary", &self.auxiliary.as_ref().map(|a| a.name().to_string()))
            .field("hub", &self.hub)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{SimDevice, SimDriver};

    fn registry(driver: SimDriver) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(driver), RegistryConfig::default(), KernelSources::new())
    }

    #[test]
    fn test_init_without_runtime_disables() {
        let mut reg = registry(SimDriver::with_devices(1));
        let err = reg.init().unwrap_err();

        assert!(matches!(err, RegistryError::NoRuntime));
        assert_eq!(reg.state(), RegistryState::Disabled);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let driver = Arc::new(SimDriver::with_devices(2));
        let mut reg = DeviceRegistry::new(driver.clone(), RegistryConfig::default(), KernelSources::new());

        reg.init().unwrap();
        reg.init().unwrap();

        assert_eq!(driver.contexts_created(), 2);
        assert_eq!(reg.device_count(), 2);
        assert_eq!(reg.active_device(), Some(DeviceId(0)));
        assert_eq!(driver.current_device(), Some(DeviceId(0)));
    }

    #[tokio::test]
    async fn test_attribute_failure_disables() {
        let mut reg = registry(SimDriver::new(vec![
            SimDevice::new("ok"),
            SimDevice::new("broken").failing_attributes(HipError::AttributeQueryFailed("warp".into())),
        ]));

        let err = reg.init().unwrap_err();
        assert!(matches!(err, RegistryError::DeviceInitFailed { device: DeviceId(1), .. }));
        assert_eq!(reg.device_count(), 0);
        assert!(reg.work_available().is_none());
    }

    #[tokio::test]
    async fn test_do_work_requires_ready() {
        let mut reg = registry(SimDriver::with_devices(1));
        assert!(matches!(reg.do_work(), Err(RegistryError::NotReady)));
    }

    #[tokio::test]
    async fn test_elem_grid_size_out_of_range() {
        let mut reg = registry(SimDriver::with_devices(1));
        reg.init().unwrap();

        assert!(reg.elem_grid_size(300, DeviceId(0)).is_some());
        assert!(reg.elem_grid_size(300, DeviceId(1)).is_none());
    }
}
