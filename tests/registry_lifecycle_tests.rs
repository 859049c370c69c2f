//! Registry initialization, failure and teardown

mod common;

use common::{small_grid_devices, SimFixture};
use proptest::prelude::*;
use rocmforge_exec::device::{
    ArenaLookup, DeviceId, DeviceMemory, FunctionHandle, KernelSources, PutOutcome,
    RegistryError, RegistryState, SimDevice, SimDriver,
};
use rocmforge_exec::HipError;

#[tokio::test]
async fn test_init_captures_profiles_in_order() {
    let mut fx = SimFixture::new(SimDriver::new(vec![
        SimDevice::new("first").with_memory(1 << 30, 2 << 30),
        SimDevice::new("second").with_max_threads_per_block(256),
    ]));

    fx.registry.init().unwrap();

    assert_eq!(fx.registry.state(), RegistryState::Ready);
    assert_eq!(fx.registry.device_count(), 2);

    let first = fx.registry.profile(DeviceId(0)).unwrap();
    assert_eq!(first.name(), "first");
    assert_eq!(first.free_mem(), 1 << 30);
    assert_eq!(first.total_mem(), 2 << 30);

    let second = fx.registry.profile(DeviceId(1)).unwrap();
    assert_eq!(second.device(), DeviceId(1));
    assert_eq!(second.max_threads_per_block(), 256);

    assert!(fx.registry.profile(DeviceId(2)).is_none());
    assert_eq!(fx.registry.contexts().count(), 2);
    assert_eq!(fx.driver.current_device(), Some(DeviceId(0)));
}

#[tokio::test]
async fn test_zero_devices_disables() {
    let mut fx = SimFixture::devices(0);

    let err = fx.registry.init().unwrap_err();

    assert!(matches!(err, RegistryError::NoDevices));
    assert_eq!(fx.registry.state(), RegistryState::Disabled);
    assert_eq!(fx.registry.device_count(), 0);
    assert!(matches!(fx.registry.do_work(), Err(RegistryError::NotReady)));
}

#[tokio::test]
async fn test_device_count_failure_disables() {
    let mut fx = SimFixture::new(
        SimDriver::with_devices(2).failing_count(HipError::InitializationFailed("no driver".into())),
    );

    let err = fx.registry.init().unwrap_err();

    assert!(matches!(err, RegistryError::DeviceCountFailed(_)));
    assert_eq!(err.hip_error(), Some(&HipError::InitializationFailed("no driver".into())));
    assert!(!fx.registry.is_ready());
}

#[tokio::test]
async fn test_out_of_memory_on_second_device_discards_everything() {
    let mut fx = SimFixture::new(SimDriver::new(vec![
        SimDevice::new("ok"),
        SimDevice::new("full")
            .with_memory(0, 8 << 30)
            .failing_context(HipError::OutOfMemory),
        SimDevice::new("never reached"),
    ]));

    let err = fx.registry.init().unwrap_err();

    match err {
        RegistryError::DeviceInitFailed { device, source } => {
            assert_eq!(device, DeviceId(1));
            assert_eq!(source, HipError::OutOfMemory);
        }
        other => panic!("expected DeviceInitFailed, got {:?}", other),
    }
    assert_eq!(fx.registry.state(), RegistryState::Disabled);
    assert_eq!(fx.registry.device_count(), 0);
    assert_eq!(fx.registry.profiles().count(), 0);
    assert_eq!(fx.registry.active_device(), None);
    assert!(fx.registry.work_available().is_none());
    assert_eq!(fx.driver.contexts_created(), 1);
    // One query for device 0's profile, one to report device 1's OOM.
    assert_eq!(fx.driver.mem_info_calls(), 2);
}

#[tokio::test]
async fn test_out_of_memory_on_first_device_queries_memory_once() {
    let mut fx = SimFixture::new(SimDriver::new(vec![
        SimDevice::new("full")
            .with_memory(0, 8 << 30)
            .failing_context(HipError::OutOfMemory),
        SimDevice::new("never reached"),
    ]));

    let err = fx.registry.init().unwrap_err();

    assert!(matches!(
        err,
        RegistryError::DeviceInitFailed { device: DeviceId(0), source: HipError::OutOfMemory }
    ));
    assert_eq!(fx.driver.contexts_created(), 0);
    assert_eq!(fx.driver.mem_info_calls(), 1);
}

#[tokio::test]
async fn test_disabled_registry_is_inert() {
    let mut fx = SimFixture::new(SimDriver::new(vec![
        SimDevice::new("broken").failing_context(HipError::ContextCreationFailed("busy".into())),
    ]));
    assert!(fx.registry.init().is_err());

    assert_eq!(fx.registry.get(DeviceId(0), 64), ArenaLookup::DeviceOutOfRange);
    let block = DeviceMemory::from_raw(0x1000);
    assert_eq!(fx.registry.put(DeviceId(0), block, 64), PutOutcome::Rejected(block));
    assert!(fx.registry.elem_grid_size(10, DeviceId(0)).is_none());
    assert!(!fx.registry.signal().await);
    assert_eq!(fx.registry.wait_for_work().await, None);
}

#[tokio::test]
async fn test_init_retries_after_failure() {
    let mut fx = SimFixture::devices(0);
    assert!(fx.registry.init().is_err());

    // A disabled registry retries on the next init; the driver has not
    // changed so it fails the same way.
    assert!(matches!(fx.registry.init(), Err(RegistryError::NoDevices)));
    assert_eq!(fx.registry.state(), RegistryState::Disabled);
}

#[tokio::test]
async fn test_teardown_returns_pooled_blocks_and_allows_reinit() {
    let mut fx = SimFixture::devices(2);
    fx.registry.init().unwrap();

    let a = DeviceMemory::from_raw(0xa000);
    let b = DeviceMemory::from_raw(0xb000);
    assert_eq!(fx.registry.put(DeviceId(0), a, 256), PutOutcome::Stored);
    assert_eq!(fx.registry.put(DeviceId(1), b, 512), PutOutcome::Stored);

    let mut pooled = fx.registry.teardown().await;
    pooled.sort_by_key(|(device, _, _)| device.index());

    assert_eq!(pooled, vec![(DeviceId(0), 256, a), (DeviceId(1), 512, b)]);
    assert_eq!(fx.registry.state(), RegistryState::Uninitialized);
    assert_eq!(fx.registry.device_count(), 0);

    fx.registry.init().unwrap();
    assert_eq!(fx.registry.device_count(), 2);
    assert_eq!(fx.registry.get(DeviceId(0), 256), ArenaLookup::Miss);
    assert_eq!(fx.driver.contexts_created(), 4);
}

#[tokio::test]
async fn test_cleanup_reaches_every_context() {
    let mut fx = SimFixture::devices(3);
    fx.registry.init().unwrap();

    fx.registry.cleanup();

    assert_eq!(fx.driver.cleanups(), 3);
    assert!(fx.registry.is_ready());
}

#[tokio::test]
async fn test_function_tables() {
    let kernels = KernelSources::new()
        .with("add_f32", "__global__ void add_f32() {}")
        .with("mul_f32", "__global__ void mul_f32() {}");
    let mut fx = SimFixture::with_kernels(SimDriver::with_devices(2), kernels);
    fx.registry.init().unwrap();

    assert_eq!(fx.registry.kernel_sources().len(), 2);
    assert!(!fx.registry.has_func("add_f32"));

    fx.registry
        .register_function("add_f32", vec![FunctionHandle(10), FunctionHandle(11)]);

    assert!(fx.registry.has_func("add_f32"));
    assert!(!fx.registry.has_func("mul_f32"));
    assert_eq!(
        fx.registry.kernel_tables().function("add_f32", 1),
        Some(FunctionHandle(11))
    );
}

#[tokio::test]
async fn test_two_device_elementwise_scenario() {
    let mut fx = SimFixture::new(small_grid_devices(2));
    fx.registry.init().unwrap();

    for device in [DeviceId(0), DeviceId(1)] {
        let geometry = fx.registry.elem_grid_size(300, device).unwrap();
        assert_eq!(geometry.as_tuple(), (2, 1, 1, 256, 1, 1));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_failing_device_disables_registry(m in 2usize..6, k_seed in 0usize..6) {
        let k = k_seed % m;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let devices = (0..m)
            .map(|i| {
                let device = SimDevice::new(format!("sim{}", i));
                if i == k {
                    device.failing_context(HipError::ContextCreationFailed("injected".into()))
                } else {
                    device
                }
            })
            .collect();
        let mut fx = SimFixture::new(SimDriver::new(devices));

        let err = fx.registry.init().unwrap_err();

        prop_assert!(
            matches!(err, RegistryError::DeviceInitFailed { device, .. } if device == DeviceId(k)),
            "unexpected error: {:?}", err
        );
        prop_assert_eq!(fx.registry.state(), RegistryState::Disabled);
        prop_assert_eq!(fx.registry.device_count(), 0);
        prop_assert_eq!(fx.driver.contexts_created(), k);
    }
}
