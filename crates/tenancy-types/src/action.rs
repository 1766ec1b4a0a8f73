//! Service actions and the cluster task that carries them to peers

use crate::{ParseError, TenantId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle action applied to a tenant's services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceAction {
    Start,
    Stop,
    Pause,
    Resume,
}

impl ServiceAction {
    /// Actions that bring services up (and therefore trigger recovery).
    pub fn is_bring_up(&self) -> bool {
        matches!(self, Self::Start | Self::Resume)
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Stop => write!(f, "STOP"),
            Self::Pause => write!(f, "PAUSE"),
            Self::Resume => write!(f, "RESUME"),
        }
    }
}

impl FromStr for ServiceAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "PAUSE" => Ok(Self::Pause),
            "RESUME" => Ok(Self::Resume),
            _ => Err(ParseError::UnknownAction(s.to_string())),
        }
    }
}

/// An administrative action shipped to every other node of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTask {
    pub action: ServiceAction,
    pub tenant_id: TenantId,
}

impl ClusterTask {
    pub fn new(action: ServiceAction, tenant_id: TenantId) -> Self {
        Self { action, tenant_id }
    }
}

impl std::fmt::Display for ClusterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} tenant {}", self.action, self.tenant_id)
    }
}

/// Result of delivering a cluster task to one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    Success,
    Failed { cause: String },
}

impl BroadcastOutcome {
    pub fn failed(cause: impl Into<String>) -> Self {
        Self::Failed {
            cause: cause.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failed { cause } => Some(cause),
        }
    }
}
