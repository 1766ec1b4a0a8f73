//! Runtime configuration of the lifecycle controllers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};

/// Settings shared by every controller of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Bound on the wait for all peers during a broadcast, in seconds
    #[serde(default = "default_broadcast_timeout")]
    pub broadcast_timeout_secs: u64,

    /// Delete every session of a tenant when its services stop
    #[serde(default = "default_true")]
    pub clear_sessions_on_stop: bool,

    /// Name of the technical principal operations run as
    #[serde(default = "default_technical_user")]
    pub technical_user: String,

    /// Whether this node recovers unfinished work of its tenants
    #[serde(default = "default_true")]
    pub responsible_for_recovery: bool,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            broadcast_timeout_secs: default_broadcast_timeout(),
            clear_sessions_on_stop: true,
            technical_user: default_technical_user(),
            responsible_for_recovery: true,
        }
    }
}

impl TenancyConfig {
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_secs)
    }

    pub fn validate(&self) -> TenancyResult<()> {
        if self.broadcast_timeout_secs == 0 {
            return Err(TenancyError::Configuration(
                "broadcast_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.technical_user.trim().is_empty() {
            return Err(TenancyError::Configuration(
                "technical_user must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_broadcast_timeout() -> u64 {
    5 * 60
}

fn default_technical_user() -> String {
    "tenancy-system".to_string()
}
