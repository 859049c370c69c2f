//! Device execution layer
//!
//! Discovers accelerators through a [`DeviceDriver`], keeps a
//! [`CapabilityProfile`] and execution context per device, fans their work
//! signals into one channel, pools device memory, and computes launch
//! geometry.

pub mod arena;
pub mod auxiliary;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod executor;
pub mod kernels;
pub mod launch;
pub mod profile;
pub mod registry;
pub mod signal;
pub mod sim;

pub use arena::{ArenaLookup, DeviceMemory, MemoryArena, MemoryPool, PutOutcome};
pub use auxiliary::AuxiliaryBackend;
pub use config::{RegistryConfig, SchedulingMode};
pub use context::{BatchedQueue, DeferredCall, ExecutionContext};
pub use driver::{DeviceDriver, MemoryInfo};
pub use error::{RegistryError, RegistryResult};
pub use executor::{AuxiliaryExecutor, ExternalExecutor, NoopExecutor};
pub use kernels::{FunctionHandle, KernelSources, KernelTables, ModuleHandle};
pub use launch::{block_thread, calc_blocks, elem_grid_size, validate_launch, LaunchGeometry};
pub use profile::{CapabilityProfile, DeviceAttributes, DeviceId};
pub use registry::{DeviceRecord, DeviceRegistry, RegistryState};
pub use signal::{PendingFlag, RelaySource, WorkReceiver, WorkSender, WorkSignalHub};
pub use sim::{SimBlas, SimBlasHandle, SimContext, SimDevice, SimDriver, SimQueueHandle, SimStream};
