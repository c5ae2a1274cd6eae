//! Runtime configuration for sync tracking.

use std::time::Duration;

use serde::Deserialize;

/// Tuning for the sync-state tracker and its notification channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackerConfig {
    /// How long a subscription may sit out-of-sync before the sweep
    /// escalates it.
    #[serde(default = "default_wait_time_for_sync_secs")]
    pub wait_time_for_sync_secs: u64,
    /// Cadence of the escalation sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bound on queued state-change notifications; overflow is dropped.
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

impl TrackerConfig {
    pub fn wait_time_for_sync(&self) -> Duration {
        Duration::from_secs(self.wait_time_for_sync_secs)
    }

    /// A zero interval would make the sweep spin; floor at one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            wait_time_for_sync_secs: default_wait_time_for_sync_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            notify_capacity: default_notify_capacity(),
        }
    }
}

fn default_wait_time_for_sync_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    1
}

fn default_notify_capacity() -> usize {
    100
}
