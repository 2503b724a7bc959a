//! Application configuration with sensible defaults.
//!
//! Node-level operational parameters live here: the active room,
//! announce cadence, and orphan-buffer limits. Transport parameters
//! live in `chaintext-network`'s `NetworkConfig`.

use serde::{Deserialize, Serialize};

use crate::{ChaintextError, Result, RoomId};

/// Global application configuration.
///
/// All values are configurable via the daemon's config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Room joined at startup.
    pub room: RoomId,

    /// Seconds between presence announcements.
    pub announce_interval_secs: u64,

    /// Seconds after which an unrefreshed announcement expires.
    ///
    /// Must exceed `announce_interval_secs`, otherwise live peers
    /// flap in and out of the directory between announcements.
    pub announce_ttl_secs: u64,

    /// Seconds between maintenance passes (negotiation expiry,
    /// directory pruning, orphan pruning, discovery).
    pub maintenance_interval_secs: u64,

    /// Maximum number of blocks held while waiting for a predecessor.
    pub orphan_capacity: usize,

    /// Seconds an orphan block may wait for its predecessor.
    pub orphan_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            room: RoomId::default(),
            announce_interval_secs: 30,
            announce_ttl_secs: 60,
            maintenance_interval_secs: 5,
            orphan_capacity: 1024,
            orphan_ttl_secs: 600,
        }
    }
}

impl AppConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.announce_interval_secs == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "announce_interval_secs must be greater than 0".into(),
            });
        }

        if self.announce_ttl_secs <= self.announce_interval_secs {
            return Err(ChaintextError::ConfigError {
                reason: "announce_ttl_secs must exceed announce_interval_secs".into(),
            });
        }

        if self.maintenance_interval_secs == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "maintenance_interval_secs must be greater than 0".into(),
            });
        }

        if self.orphan_capacity == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "orphan_capacity must be greater than 0".into(),
            });
        }

        if self.orphan_ttl_secs == 0 {
            return Err(ChaintextError::ConfigError {
                reason: "orphan_ttl_secs must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
