//! Registry configuration

use serde::{Deserialize, Serialize};

/// Environment variable selecting context scheduling ("auto" or "blocking")
const SCHED_ENV: &str = "ROCMFORGE_SCHED";

/// Environment variable overriding the shared signal channel capacity
const SIGNAL_CAPACITY_ENV: &str = "ROCMFORGE_SIGNAL_CAPACITY";

/// How a context's host thread waits for the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Let the driver choose between spinning and yielding
    Auto,
    /// Block the host thread on a sync primitive; easier to debug
    #[default]
    BlockingSync,
}

impl SchedulingMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(SchedulingMode::Auto),
            "blocking" | "blocking_sync" | "sync" => Some(SchedulingMode::BlockingSync),
            _ => None,
        }
    }
}

/// Settings for [`DeviceRegistry`](crate::device::DeviceRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Scheduling mode passed to every context
    pub scheduling: SchedulingMode,
    /// Capacity of the shared work-signal channel (1 = rendezvous-like)
    pub signal_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            scheduling: SchedulingMode::BlockingSync,
            signal_capacity: 1,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment
    ///
    /// - `HIP_LAUNCH_BLOCKING=1` forces blocking-sync scheduling
    /// - `ROCMFORGE_SCHED=auto|blocking` selects the scheduling mode
    /// - `ROCMFORGE_SIGNAL_CAPACITY=<n>` sets the signal channel capacity
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(mode) = std::env::var(SCHED_ENV)
            .ok()
            .and_then(|s| SchedulingMode::from_str(&s))
        {
            config.scheduling = mode;
        }

        let launch_blocking = std::env::var("HIP_LAUNCH_BLOCKING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if launch_blocking {
            config.scheduling = SchedulingMode::BlockingSync;
        }

        if let Some(capacity) = std::env::var(SIGNAL_CAPACITY_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config = config.with_signal_capacity(capacity);
        }

        config
    }

    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Set the signal channel capacity; zero is clamped to one
    pub fn with_signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity.max(1);
        self
    }
}
