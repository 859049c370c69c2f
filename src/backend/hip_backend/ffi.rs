//! HIP FFI bindings
//!
//! Only the runtime entry points the device registry needs: enumeration,
//! properties, memory info, device selection and streams.

use std::ffi::c_void;

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDeviceProperties(props: *mut super::device::HipDeviceProp, device_id: i32) -> i32;
    pub fn hipSetDevice(device_id: i32) -> i32;
    pub fn hipSetDeviceFlags(flags: u32) -> i32;
    pub fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// hipErrorOutOfMemory
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// hipErrorNoDevice
pub const HIP_ERROR_NO_DEVICE: i32 = 100;

// hipSetDeviceFlags scheduling flags
pub const HIP_DEVICE_SCHEDULE_AUTO: u32 = 0x0;
pub const HIP_DEVICE_SCHEDULE_BLOCKING_SYNC: u32 = 0x4;
