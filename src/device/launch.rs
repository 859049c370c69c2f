//! Launch geometry for elementwise kernels
//!
//! Maps an element count onto a grid/block tuple that respects a device's
//! [`CapabilityProfile`]. Elementwise kernels index with one thread per element,
//! so the block is always one-dimensional and the grid grows X first, then Y,
//! then Z.

use crate::backend::hip_backend::{HipError, HipResult};
use crate::device::profile::CapabilityProfile;
use serde::Serialize;

/// Grid and block dimensions for one kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchGeometry {
    /// Grid dimensions (x, y, z)
    pub grid: (u32, u32, u32),
    /// Block dimensions (x, y, z)
    pub block: (u32, u32, u32),
}

impl LaunchGeometry {
    /// The all-ones geometry returned when the work does not fit the grid
    pub const SATURATED: LaunchGeometry = LaunchGeometry {
        grid: (1, 1, 1),
        block: (1, 1, 1),
    };

    /// Total threads launched (product of all six dimensions)
    pub fn total_threads(&self) -> u64 {
        self.grid.0 as u64
            * self.grid.1 as u64
            * self.grid.2 as u64
            * self.block.0 as u64
            * self.block.1 as u64
            * self.block.2 as u64
    }

    /// Flattened six-tuple `(gridX, gridY, gridZ, blockX, blockY, blockZ)`
    pub fn as_tuple(&self) -> (u32, u32, u32, u32, u32, u32) {
        (
            self.grid.0,
            self.grid.1,
            self.grid.2,
            self.block.0,
            self.block.1,
            self.block.2,
        )
    }
}

/// Ceiling division on u64
///
/// The denominator must be non-zero; callers clamp device limits to at least 1.
#[inline]
fn ceil_div_u64(numerator: u64, denominator: u64) -> u64 {
    numerator.div_ceil(denominator)
}

/// Number of blocks of `max_threads` needed to cover `n` elements
#[inline]
pub fn calc_blocks(n: u64, max_threads: u64) -> u64 {
    ceil_div_u64(n, max_threads.max(1))
}

/// Compute the launch geometry for `n` elementwise operations.
///
/// Cases are evaluated in order and each assumes the previous ones were false:
///
/// 1. one block covers everything: `block.x = n`
/// 2. the work exceeds the whole grid: [`LaunchGeometry::SATURATED`], the
///    caller must split the launch into several passes
/// 3. a full X-Y plane with the remainder spread over Z
/// 4. a full X row with the remainder spread over Y
/// 5. a single row of `blocks` blocks
///
/// In cases 3 to 5 the block is `max_threads_per_block` wide.
///
/// `n == 0` produces a zero-width grid; there is nothing to launch.
pub fn elem_grid_size(n: usize, profile: &CapabilityProfile) -> LaunchGeometry {
    let max_threads = profile.max_threads_per_block().max(1);
    let [max_grid_x, max_grid_y, max_grid_z] = profile.max_grid_dim().map(|d| d.max(1) as u64);

    let plane = max_grid_x.saturating_mul(max_grid_y);
    let volume = plane.saturating_mul(max_grid_z);

    let n = n as u64;
    let blocks = calc_blocks(n, max_threads as u64);

    let mut geometry = LaunchGeometry::SATURATED;
    if blocks == 1 {
        geometry.block.0 = n as u32;
    } else if blocks >= volume {
        tracing::warn!(
            device = profile.device().index(),
            n,
            blocks,
            "elementwise launch exceeds grid capacity, returning saturated geometry"
        );
    } else if blocks >= plane {
        geometry.grid = (
            max_grid_x as u32,
            max_grid_y as u32,
            ceil_div_u64(blocks % plane, max_grid_z) as u32,
        );
        geometry.block.0 = max_threads;
    } else if blocks >= max_grid_x {
        geometry.grid.0 = max_grid_x as u32;
        geometry.grid.1 = ceil_div_u64(blocks % max_grid_x, max_grid_y) as u32;
        geometry.block.0 = max_threads;
    } else {
        geometry.grid.0 = blocks as u32;
        geometry.block.0 = max_threads;
    }

    geometry
}

/// Simpler `(blocks, threads)` pair for debugging launches.
///
/// Rounds the thread count up to the next of 32..1024 and caps the block
/// count at 128.
pub fn block_thread(n: usize) -> (u32, u32) {
    let threads: u32 = match n {
        0..=32 => 32,
        33..=64 => 64,
        65..=128 => 128,
        129..=256 => 256,
        257..=512 => 512,
        _ => 1024,
    };

    let blocks = calc_blocks(n as u64, threads as u64).min(128) as u32;
    (blocks, threads)
}

/// Validate a launch geometry against a device's limits
///
/// Returns a `KernelLaunchFailed` naming the first violated limit.
pub fn validate_launch(geometry: &LaunchGeometry, profile: &CapabilityProfile) -> HipResult<()> {
    let block = geometry.block;
    let grid = geometry.grid;
    let max_block = profile.max_block_dim();
    let max_grid = profile.max_grid_dim();

    let threads_per_block = block.0 as u64 * block.1 as u64 * block.2 as u64;
    if threads_per_block > profile.max_threads_per_block() as u64 {
        return Err(HipError::KernelLaunchFailed(format!(
            "Threads per block {} exceeds limit {} (block={:?})",
            threads_per_block,
            profile.max_threads_per_block(),
            block
        )));
    }

    for (axis, (value, limit)) in ["x", "y", "z"]
        .iter()
        .zip([(block.0, max_block[0]), (block.1, max_block[1]), (block.2, max_block[2])])
    {
        if value > limit {
            return Err(HipError::KernelLaunchFailed(format!(
                "block.{} {} exceeds limit {}",
                axis, value, limit
            )));
        }
    }

    for (axis, (value, limit)) in ["x", "y", "z"]
        .iter()
        .zip([(grid.0, max_grid[0]), (grid.1, max_grid[1]), (grid.2, max_grid[2])])
    {
        if value == 0 || value > limit {
            return Err(HipError::KernelLaunchFailed(format!(
                "grid.{} {} invalid (limit: 1..{})",
                axis, value, limit
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::profile::{DeviceAttributes, DeviceId};
    use proptest::prelude::*;

    fn profile(max_threads: u32, grid: [u32; 3]) -> CapabilityProfile {
        CapabilityProfile::new(
            DeviceId(0),
            DeviceAttributes {
                name: "test".to_string(),
                compute_units: 1,
                warp_size: 32,
                max_threads_per_block: max_threads,
                max_grid_dim: grid,
                max_block_dim: [max_threads, max_threads, 64],
            },
            0,
            0,
        )
    }

    #[test]
    fn test_single_block_uses_exact_width() {
        let p = profile(256, [65535, 65535, 65535]);
        assert_eq!(elem_grid_size(1, &p).as_tuple(), (1, 1, 1, 1, 1, 1));
        assert_eq!(elem_grid_size(200, &p).as_tuple(), (1, 1, 1, 200, 1, 1));
        assert_eq!(elem_grid_size(256, &p).as_tuple(), (1, 1, 1, 256, 1, 1));
    }

    #[test]
    fn test_two_blocks_fall_into_row() {
        let p = profile(256, [65535, 65535, 65535]);
        assert_eq!(elem_grid_size(300, &p).as_tuple(), (2, 1, 1, 256, 1, 1));
    }

    #[test]
    fn test_full_row_spreads_remainder_over_y() {
        let p = profile(4, [8, 8, 8]);
        // 40 elements -> 10 blocks: one full row of 8, remainder 2 over y
        assert_eq!(elem_grid_size(40, &p).as_tuple(), (8, 1, 1, 4, 1, 1));
        // 4 * 19 = 76 -> 19 blocks, remainder 3 -> ceil(3 / 8) = 1
        assert_eq!(elem_grid_size(76, &p).as_tuple(), (8, 1, 1, 4, 1, 1));
    }

    #[test]
    fn test_full_plane_spreads_remainder_over_z() {
        let p = profile(4, [4, 4, 2]);
        // 4 * 20 = 80 -> 20 blocks, plane 16, remainder 4 -> ceil(4 / 2) = 2
        assert_eq!(elem_grid_size(80, &p).as_tuple(), (4, 4, 2, 4, 1, 1));
    }

    #[test]
    fn test_overflow_returns_saturated() {
        let p = profile(4, [2, 2, 2]);
        // 8 blocks == whole grid
        let geometry = elem_grid_size(32, &p);
        assert_eq!(geometry, LaunchGeometry::SATURATED);
    }

    #[test]
    fn test_zero_elements_launch_nothing() {
        let p = profile(256, [65535, 65535, 65535]);
        let geometry = elem_grid_size(0, &p);
        assert_eq!(geometry.total_threads(), 0);
    }

    #[test]
    fn test_zero_limits_do_not_panic() {
        let p = profile(0, [0, 0, 0]);
        let _ = elem_grid_size(1000, &p);
    }

    #[test]
    fn test_block_thread_buckets() {
        assert_eq!(block_thread(1), (1, 32));
        assert_eq!(block_thread(33), (1, 64));
        assert_eq!(block_thread(300), (1, 512));
        assert_eq!(block_thread(4096), (4, 1024));
        assert_eq!(block_thread(1 << 30), (128, 1024));
    }

    #[test]
    fn test_validate_launch_rejects_oversized_block() {
        let p = profile(256, [65535, 65535, 65535]);
        let geometry = LaunchGeometry {
            grid: (1, 1, 1),
            block: (512, 1, 1),
        };
        let err = validate_launch(&geometry, &p).unwrap_err();
        assert!(err.to_string().contains("Threads per block"));
    }

    #[test]
    fn test_validate_launch_rejects_zero_grid() {
        let p = profile(256, [65535, 65535, 65535]);
        let geometry = LaunchGeometry {
            grid: (1, 0, 1),
            block: (32, 1, 1),
        };
        let err = validate_launch(&geometry, &p).unwrap_err();
        assert!(err.to_string().contains("grid.y"));
    }

    proptest! {
        #[test]
        fn prop_small_counts_fit_one_block(max_threads in 1u32..=1024, n in 1usize..=1024) {
            prop_assume!(n <= max_threads as usize);
            let p = profile(max_threads, [65535, 65535, 65535]);
            prop_assert_eq!(elem_grid_size(n, &p).as_tuple(), (1, 1, 1, n as u32, 1, 1));
        }

        #[test]
        fn prop_row_launches_cover_work(
            max_threads in 1u32..=1024,
            max_grid_x in 2u32..=65535,
            seed in any::<u64>(),
        ) {
            // Stay below a full row, where the grid is exactly `blocks` wide.
            let limit = (max_grid_x as u64 - 1) * max_threads as u64;
            let n = (seed % limit + 1) as usize;
            let p = profile(max_threads, [max_grid_x, 65535, 65535]);

            let geometry = elem_grid_size(n, &p);
            prop_assert!(geometry.total_threads() >= n as u64);
            prop_assert!(validate_launch(&geometry, &p).is_ok());
        }
    }
}
