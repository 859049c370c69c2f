//! Shared fixtures for registry tests
//!
//! Every test runs against `SimDriver`; no GPU is needed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rocmforge_exec::device::{
    DeviceRegistry, KernelSources, RegistryConfig, SimDevice, SimDriver,
};

/// How long a test waits for relays before giving up
pub const SIGNAL_TIMEOUT: Duration = Duration::from_secs(2);

/// A registry plus the driver handle tests use to reach device queues
pub struct SimFixture {
    pub driver: Arc<SimDriver>,
    pub registry: DeviceRegistry,
}

impl SimFixture {
    pub fn new(driver: SimDriver) -> Self {
        Self::with_kernels(driver, KernelSources::new())
    }

    pub fn with_kernels(driver: SimDriver, kernels: KernelSources) -> Self {
        let driver = Arc::new(driver);
        let registry = DeviceRegistry::new(driver.clone(), RegistryConfig::default(), kernels);
        Self { driver, registry }
    }

    /// `n` default devices
    pub fn devices(n: usize) -> Self {
        Self::new(SimDriver::with_devices(n))
    }
}

/// Devices with a 256-thread block limit and a 65535 grid in every dimension
pub fn small_grid_devices(n: usize) -> SimDriver {
    SimDriver::new(
        (0..n)
            .map(|i| {
                SimDevice::new(format!("small{}", i))
                    .with_max_threads_per_block(256)
                    .with_max_grid_dim([65535, 65535, 65535])
            })
            .collect(),
    )
}

/// Counter shared with deferred calls
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wait for `count` wake-ups on the registry's shared channel
pub async fn wait_for_signals(registry: &mut DeviceRegistry, count: usize) {
    for i in 0..count {
        let got = tokio::time::timeout(SIGNAL_TIMEOUT, registry.wait_for_work())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for signal {} of {}", i + 1, count));
        assert_eq!(got, Some(()), "hub closed after {} of {} signals", i, count);
    }
}
