use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Startup-time configuration for the dispatch layer
///
/// Everything here is fixed for the lifetime of the process; there is no
/// runtime reconfiguration. Durations live as millisecond fields so the
/// struct deserializes naturally from a TOML table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of worker lanes. The lane a key hashes to is fixed for the
    /// process lifetime, so this cannot change without restarting.
    pub lane_count: usize,
    /// How long an idle worker sleeps before rechecking its lane
    pub poll_interval_ms: u64,
    /// Timer wheel tick interval
    pub tick_interval_ms: u64,
    /// Queue depth at which a lane is eligible to be called congested
    pub congestion_depth: usize,
    /// Head-of-line age (ms) at which a lane is eligible to be called
    /// congested
    pub congestion_age_ms: u64,
    /// Base of the Retry-After hint attached to congestion rejections
    pub retry_after_base_secs: u64,
    /// Random spread added on top of the Retry-After base
    pub retry_after_spread_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            lane_count: num_cpus::get(),
            poll_interval_ms: 10,
            tick_interval_ms: 25,
            congestion_depth: 50,
            congestion_age_ms: 1_000,
            retry_after_base_secs: 5,
            retry_after_spread_secs: 10,
        }
    }
}

impl DispatchConfig {
    /// Checks the configuration for values that would break invariants
    /// downstream. Zero lanes would make lane selection divide by zero,
    /// so it is rejected here, before anything is built.
    pub fn validate(&self) -> Result<()> {
        if self.lane_count == 0 {
            return Err(Error::InvalidConfig("lane_count must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "tick_interval_ms must be at least 1".into(),
            ));
        }
        if self.congestion_depth == 0 {
            return Err(Error::InvalidConfig(
                "congestion_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn congestion_age(&self) -> Duration {
        Duration::from_millis(self.congestion_age_ms)
    }
}
