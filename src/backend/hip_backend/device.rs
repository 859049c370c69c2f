//! HIP device properties

use std::ffi::CStr;

use crate::device::profile::DeviceAttributes;

// Opaque buffer for hipDeviceProp_t. Must be exactly sizeof(hipDeviceProp_t)
// (1472 bytes on ROCm 6/7) because the runtime writes the whole struct.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HipDeviceProp {
    buffer: [u8; 1472],
}

// Field offsets from hip_runtime_api.h:
//   name[256]            0
//   uuid, luid, mask   256..284, 4 bytes padding
//   totalGlobalMem     288
//   warpSize           308
//   maxThreadsPerBlock 320
//   maxThreadsDim[3]   324
//   maxGridSize[3]     336
//   multiProcessorCount 388
impl HipDeviceProp {
    const NAME_OFFSET: usize = 0;
    const NAME_LEN: usize = 256;
    const TOTAL_GLOBAL_MEM_OFFSET: usize = 288;
    const WARP_SIZE_OFFSET: usize = 308;
    const MAX_THREADS_PER_BLOCK_OFFSET: usize = 320;
    const MAX_THREADS_DIM_OFFSET: usize = 324;
    const MAX_GRID_SIZE_OFFSET: usize = 336;
    const MULTI_PROCESSOR_COUNT_OFFSET: usize = 388;

    fn read_i32(&self, offset: usize) -> Option<i32> {
        self.buffer
            .get(offset..offset + 4)?
            .try_into()
            .ok()
            .map(i32::from_ne_bytes)
    }

    fn read_u64(&self, offset: usize) -> Option<u64> {
        self.buffer
            .get(offset..offset + 8)?
            .try_into()
            .ok()
            .map(u64::from_ne_bytes)
    }

    fn read_dims(&self, offset: usize, fallback: i32) -> [u32; 3] {
        let mut dims = [0u32; 3];
        for (i, dim) in dims.iter_mut().enumerate() {
            *dim = self.read_i32(offset + i * 4).unwrap_or(fallback).max(0) as u32;
        }
        dims
    }

    /// Device name (null-terminated C string)
    pub fn name(&self) -> String {
        let bytes = &self.buffer[Self::NAME_OFFSET..Self::NAME_OFFSET + Self::NAME_LEN];
        let len = bytes.iter().position(|&c| c == 0).unwrap_or(Self::NAME_LEN);
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    pub fn total_global_mem(&self) -> u64 {
        self.read_u64(Self::TOTAL_GLOBAL_MEM_OFFSET).unwrap_or(0)
    }

    pub fn multi_processor_count(&self) -> i32 {
        self.read_i32(Self::MULTI_PROCESSOR_COUNT_OFFSET).unwrap_or(0)
    }

    /// 32 on RDNA, 64 on CDNA
    pub fn warp_size(&self) -> i32 {
        self.read_i32(Self::WARP_SIZE_OFFSET).unwrap_or(32)
    }

    pub fn max_threads_per_block(&self) -> i32 {
        self.read_i32(Self::MAX_THREADS_PER_BLOCK_OFFSET).unwrap_or(1024)
    }

    pub fn max_threads_dim(&self) -> [u32; 3] {
        self.read_dims(Self::MAX_THREADS_DIM_OFFSET, 1024)
    }

    pub fn max_grid_size(&self) -> [u32; 3] {
        self.read_dims(Self::MAX_GRID_SIZE_OFFSET, 65535)
    }

    /// Launch limits in the registry's representation
    pub fn to_attributes(&self) -> DeviceAttributes {
        DeviceAttributes {
            name: self.name(),
            compute_units: self.multi_processor_count().max(0) as u32,
            warp_size: self.warp_size().max(0) as u32,
            max_threads_per_block: self.max_threads_per_block().max(0) as u32,
            max_grid_dim: self.max_grid_size(),
            max_block_dim: self.max_threads_dim(),
        }
    }
}

impl Default for HipDeviceProp {
    fn default() -> Self {
        HipDeviceProp { buffer: [0u8; 1472] }
    }
}

/// Get HIP error string from error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = super::ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}
