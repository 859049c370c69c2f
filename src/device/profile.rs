//! Device capability profiles
//!
//! A [`CapabilityProfile`] is captured once per device while the registry
//! initializes and is read-only afterwards. The launch-geometry calculator and
//! launch validation read their limits from here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense device identifier in `0..device_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for DeviceId {
    fn from(index: usize) -> Self {
        DeviceId(index)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.0)
    }
}

/// Raw launch attributes as reported by a driver
///
/// This is what [`DeviceDriver::attributes`](crate::device::DeviceDriver::attributes)
/// returns. Memory statistics are queried separately and merged in by
/// [`CapabilityProfile::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub name: String,
    pub compute_units: u32,
    /// Wavefront size: 32 for RDNA3, 64 for CDNA3
    pub warp_size: u32,
    pub max_threads_per_block: u32,
    /// Maximum grid dimensions [x, y, z]
    pub max_grid_dim: [u32; 3],
    /// Maximum threads per block dimension [x, y, z]
    pub max_block_dim: [u32; 3],
}

/// Hardware limits and memory statistics for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    device: DeviceId,
    attributes: DeviceAttributes,
    free_mem: u64,
    total_mem: u64,
}

impl CapabilityProfile {
    pub fn new(device: DeviceId, attributes: DeviceAttributes, free_mem: u64, total_mem: u64) -> Self {
        Self {
            device,
            attributes,
            free_mem,
            total_mem,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn compute_units(&self) -> u32 {
        self.attributes.compute_units
    }

    pub fn warp_size(&self) -> u32 {
        self.attributes.warp_size
    }

    pub fn max_threads_per_block(&self) -> u32 {
        self.attributes.max_threads_per_block
    }

    pub fn max_grid_dim(&self) -> [u32; 3] {
        self.attributes.max_grid_dim
    }

    pub fn max_block_dim(&self) -> [u32; 3] {
        self.attributes.max_block_dim
    }

    /// Free device memory in bytes at the time the profile was captured
    pub fn free_mem(&self) -> u64 {
        self.free_mem
    }

    pub fn total_mem(&self) -> u64 {
        self.total_mem
    }

    pub fn attributes(&self) -> &DeviceAttributes {
        &self.attributes
    }
}

impl fmt::Display for CapabilityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): warp={}, maxThreadsPerBlock={}, maxGrid={:?}, maxBlock={:?}, mem {}/{} MB free",
            self.device,
            self.attributes.name,
            self.attributes.warp_size,
            self.attributes.max_threads_per_block,
            self.attributes.max_grid_dim,
            self.attributes.max_block_dim,
            self.free_mem / 1024 / 1024,
            self.total_mem / 1024 / 1024
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rdna3_attributes() -> DeviceAttributes {
        DeviceAttributes {
            name: "Radeon RX 7900 XT".to_string(),
            compute_units: 84,
            warp_size: 32,
            max_threads_per_block: 1024,
            max_grid_dim: [2147483647, 65535, 65535],
            max_block_dim: [1024, 1024, 1024],
        }
    }

    #[test]
    fn test_profile_accessors() {
        let profile = CapabilityProfile::new(DeviceId(1), rdna3_attributes(), 1 << 30, 20 << 30);

        assert_eq!(profile.device(), DeviceId(1));
        assert_eq!(profile.warp_size(), 32);
        assert_eq!(profile.max_threads_per_block(), 1024);
        assert_eq!(profile.max_grid_dim(), [2147483647, 65535, 65535]);
        assert_eq!(profile.max_block_dim(), [1024, 1024, 1024]);
        assert_eq!(profile.free_mem(), 1 << 30);
        assert_eq!(profile.total_mem(), 20 << 30);
        assert_eq!(profile.compute_units(), 84);
    }

    #[test]
    fn test_profile_display_mentions_limits() {
        let profile = CapabilityProfile::new(DeviceId(0), rdna3_attributes(), 0, 0);
        let text = profile.to_string();
        assert!(text.contains("device 0"));
        assert!(text.contains("maxThreadsPerBlock=1024"));
    }

    #[test]
    fn test_profile_serializes() {
        let profile = CapabilityProfile::new(DeviceId(0), rdna3_attributes(), 1, 2);
        let json = serde_json::to_string(&profile).unwrap();
        let back: CapabilityProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
