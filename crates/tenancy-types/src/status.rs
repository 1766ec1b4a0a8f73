//! Tenant status types
//!
//! `TenantStatus` is durable and shared cluster-wide through the store.
//! `LocalLifecycleState` is the in-memory view one node has of a tenant's
//! services; it is never persisted and starts out `Stopped`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Persisted tenant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Activated,
    Deactivated,
    Paused,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activated => "ACTIVATED",
            Self::Deactivated => "DEACTIVATED",
            Self::Paused => "PAUSED",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVATED" => Ok(Self::Activated),
            "DEACTIVATED" => Ok(Self::Deactivated),
            "PAUSED" => Ok(Self::Paused),
            _ => Err(ParseError::UnknownStatus(s.to_string())),
        }
    }
}

/// In-memory lifecycle state of a tenant's services on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalLifecycleState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl LocalLifecycleState {
    /// Whether an operation is currently moving the services.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for LocalLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Started => write!(f, "STARTED"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// Failure to parse a textual status or action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown tenant status: {0}")]
    UnknownStatus(String),

    #[error("Unknown service action: {0}")]
    UnknownAction(String),
}
