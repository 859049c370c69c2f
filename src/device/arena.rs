//! Pooled device memory, keyed by device and byte size
//!
//! The arena is a reuse cache, not an allocator: callers allocate fresh device
//! memory themselves on a miss and hand blocks back with [`MemoryArena::put`]
//! when they are done with them. Pools are created lazily on the first `put`
//! of a size and are never trimmed. The arena does not check that a returned
//! block really is `size` bytes long; that is the caller's contract.
//!
//! Access needs `&mut self`, so one owner (the execution loop) serializes all
//! `get`/`put` calls for every device.

use std::collections::HashMap;
use std::fmt;

use crate::device::profile::DeviceId;

/// Opaque handle to device-resident memory (a device address)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMemory(u64);

impl DeviceMemory {
    pub fn from_raw(addr: u64) -> Self {
        DeviceMemory(addr)
    }

    pub fn addr(self) -> u64 {
        self.0
    }

    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as usize as *mut std::ffi::c_void
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceMemory(0x{:x})", self.0)
    }
}

/// Result of [`MemoryArena::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaLookup<M> {
    /// A pooled block was removed from the pool and is now owned by the caller
    Hit(M),
    /// Nothing pooled for this size; allocate fresh memory
    Miss,
    /// The device id is not below the arena's device count
    DeviceOutOfRange,
}

impl<M> ArenaLookup<M> {
    pub fn into_block(self) -> Option<M> {
        match self {
            ArenaLookup::Hit(block) => Some(block),
            ArenaLookup::Miss | ArenaLookup::DeviceOutOfRange => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, ArenaLookup::Hit(_))
    }
}

/// Result of [`MemoryArena::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome<M> {
    Stored,
    /// The device id was out of range; the block is handed back untouched
    Rejected(M),
}

/// Blocks of a single size class on a single device
#[derive(Debug)]
pub struct MemoryPool<M> {
    size: usize,
    blocks: Vec<M>,
}

impl<M> MemoryPool<M> {
    fn new(size: usize) -> Self {
        Self {
            size,
            blocks: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    // LIFO
    fn take(&mut self) -> Option<M> {
        self.blocks.pop()
    }

    fn add(&mut self, block: M) {
        self.blocks.push(block);
    }
}

type DevicePools<M> = HashMap<usize, MemoryPool<M>>;

/// Per-device, per-size pools of reusable device memory
#[derive(Debug)]
pub struct MemoryArena<M = DeviceMemory> {
    devices: Vec<DevicePools<M>>,
}

impl<M> MemoryArena<M> {
    /// Create an arena for `device_count` devices with no pools
    pub fn new(device_count: usize) -> Self {
        Self {
            devices: (0..device_count).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Take a pooled block of `size` bytes on `device`
    pub fn get(&mut self, device: DeviceId, size: usize) -> ArenaLookup<M> {
        let Some(pools) = self.devices.get_mut(device.index()) else {
            return ArenaLookup::DeviceOutOfRange;
        };

        match pools.get_mut(&size).and_then(MemoryPool::take) {
            Some(block) => ArenaLookup::Hit(block),
            None => ArenaLookup::Miss,
        }
    }

    /// Return a block of `size` bytes on `device` to its pool
    pub fn put(&mut self, device: DeviceId, block: M, size: usize) -> PutOutcome<M> {
        let Some(pools) = self.devices.get_mut(device.index()) else {
            tracing::debug!(device = device.index(), size, "put for unknown device ignored");
            return PutOutcome::Rejected(block);
        };

        pools
            .entry(size)
            .or_insert_with(|| MemoryPool::new(size))
            .add(block);
        PutOutcome::Stored
    }

    /// The pool for `(device, size)` if one has been created
    pub fn pool(&self, device: DeviceId, size: usize) -> Option<&MemoryPool<M>> {
        self.devices.get(device.index())?.get(&size)
    }

    /// Number of size classes with a pool on `device`
    pub fn pool_count(&self, device: DeviceId) -> usize {
        self.devices.get(device.index()).map_or(0, HashMap::len)
    }

    /// Total blocks currently held for `device`
    pub fn pooled_blocks(&self, device: DeviceId) -> usize {
        self.devices
            .get(device.index())
            .map_or(0, |pools| pools.values().map(MemoryPool::len).sum())
    }

    /// Remove every pooled block on `device`, returning `(size, block)` pairs
    ///
    /// The pools themselves stay in place. Freeing the returned memory is up to
    /// the caller.
    pub fn drain_device(&mut self, device: DeviceId) -> Vec<(usize, M)> {
        let Some(pools) = self.devices.get_mut(device.index()) else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        for (size, pool) in pools.iter_mut() {
            drained.extend(pool.blocks.drain(..).map(|block| (*size, block)));
        }
        drained
    }

    /// Drain every device, returning `(device, size, block)` triples
    pub fn drain_all(&mut self) -> Vec<(DeviceId, usize, M)> {
        (0..self.devices.len())
            .flat_map(|index| {
                let device = DeviceId(index);
                self.drain_device(device)
                    .into_iter()
                    .map(move |(size, block)| (device, size, block))
            })
            .collect()
    }
}
