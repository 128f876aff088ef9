//! Session configuration
//!
//! Every field has a default so a host can start from `TenureConfig::default()`
//! or load a partial JSON document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{TenureError, TenureResult};

/// Largest roster a session may configure
pub const MAX_LOBBY_SIZE: usize = 100;

/// Replication settings shared by every replicated object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Allow ownership to move between participants at all. When false the
    /// only legal transfer is the environment reassigning a departed owner's
    /// objects.
    pub allow_unforced_transfer: bool,
    /// Allow participants other than the local one to request ownership.
    pub allow_non_owner_request: bool,
    /// Ticks the post-broadcast self-check waits for a transport result.
    pub confirm_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            allow_unforced_transfer: true,
            allow_non_owner_request: true,
            confirm_attempts: 60,
        }
    }
}

/// Object pool settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Wait between assigning a slot and enforcing it, in milliseconds.
    /// The transport only starts replicating a freshly spawned object some
    /// time after it is enabled.
    pub settle_delay_ms: u64,
}

impl PoolConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            settle_delay_ms: 3000,
        }
    }
}

/// Roster settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub max_lobby_size: usize,
}

impl Default for RosterConfig {
    fn default() -> Self {
        RosterConfig { max_lobby_size: 8 }
    }
}

/// Logging settings, consumed by the runtime's subscriber setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `"info,tenure_pool=debug"`
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Complete configuration for one session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenureConfig {
    pub sync: SyncConfig,
    pub pool: PoolConfig,
    pub roster: RosterConfig,
    pub log: LogConfig,
}

impl TenureConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> TenureResult<Self> {
        let config: TenureConfig =
            serde_json::from_str(json).map_err(|e| TenureError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TenureResult<()> {
        if self.roster.max_lobby_size == 0 || self.roster.max_lobby_size > MAX_LOBBY_SIZE {
            return Err(TenureError::InvalidConfig(format!(
                "max_lobby_size must be within 1..={}, got {}",
                MAX_LOBBY_SIZE, self.roster.max_lobby_size
            )));
        }
        if self.sync.confirm_attempts == 0 {
            return Err(TenureError::InvalidConfig(
                "confirm_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
