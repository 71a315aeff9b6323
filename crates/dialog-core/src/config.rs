//! Whole-engine startup configuration.
//!
//! One TOML file configures everything: the transport bind address, the
//! RFC 3261 timer base, and the dispatch layer underneath. Nothing in
//! it can change after startup; a different shape needs a restart.
//!
//! ```toml
//! bind_addr = "0.0.0.0:5060"
//! t1_ms = 500
//! t2_ms = 4000
//!
//! [dispatch]
//! lane_count = 8
//! congestion_depth = 50
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use siprail_dispatch_core::DispatchConfig;
use siprail_transaction_core::TimerSettings;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the UDP transport binds
    pub bind_addr: SocketAddr,
    /// T1, the retransmit base and round-trip estimate, in ms
    pub t1_ms: u64,
    /// T2, the retransmit interval cap, in ms
    pub t2_ms: u64,
    /// T4, the maximum time a message stays in flight, in ms
    pub t4_ms: u64,
    /// Lane, worker and congestion settings
    pub dispatch: DispatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5060)),
            t1_ms: 500,
            t2_ms: 4_000,
            t4_ms: 5_000,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses and validates TOML text. Absent fields take defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        if self.t1_ms == 0 {
            return Err(Error::Config("t1_ms must be at least 1".into()));
        }
        if self.t2_ms < self.t1_ms {
            return Err(Error::Config("t2_ms must be at least t1_ms".into()));
        }
        if self.t4_ms == 0 {
            return Err(Error::Config("t4_ms must be at least 1".into()));
        }
        Ok(())
    }

    /// The transaction timer table this configuration asks for, with
    /// the 64 * T1 timeouts recomputed from the base
    pub fn timer_settings(&self) -> TimerSettings {
        let mut settings = TimerSettings::from_intervals(
            Duration::from_millis(self.t1_ms),
            Duration::from_millis(self.t2_ms),
        );
        settings.t4 = Duration::from_millis(self.t4_ms);
        settings
    }
}
