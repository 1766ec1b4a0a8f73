//! Error types for the tenant lifecycle runtime

use std::collections::BTreeMap;

use tenancy_types::{BroadcastOutcome, NodeId, ServiceAction, TenantId, TenantStatus};
use thiserror::Error;

/// Tenancy error type
#[derive(Debug, Error)]
pub enum TenancyError {
    /// Transition not allowed for the persisted status
    #[error("{0}")]
    PreconditionViolation(String),

    /// A tenant service failed while applying an action
    #[error("Service {service} failed to {action}: {message}")]
    LocalApply {
        service: String,
        action: ServiceAction,
        message: String,
    },

    /// A recovery handler failed before services started
    #[error("Recovery handler {handler} failed to prepare tenant {tenant_id}: {source}")]
    RecoveryPrepare {
        handler: String,
        tenant_id: TenantId,
        #[source]
        source: Box<TenancyError>,
    },

    /// A recovery handler failed or panicked after services started.
    /// `source` is absent for a panic.
    #[error("Recovery handler {handler} failed to restart tenant {tenant_id}: {message}")]
    RecoveryRestart {
        handler: String,
        tenant_id: TenantId,
        message: String,
        #[source]
        source: Option<Box<TenancyError>>,
    },

    /// At least one peer failed or timed out
    #[error("Broadcast of {action} for tenant {tenant_id} failed on node {failed_node}: {cause}")]
    Broadcast {
        action: ServiceAction,
        tenant_id: TenantId,
        failed_node: NodeId,
        cause: String,
        outcomes: BTreeMap<NodeId, BroadcastOutcome>,
    },

    /// Store or transaction manager failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Session store failure
    #[error("Session error: {0}")]
    Session(String),

    /// Job scheduler failure
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Peer unreachable or peer-side failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for tenancy operations
pub type TenancyResult<T> = std::result::Result<T, TenancyError>;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PreconditionViolation,
    LocalApplyFailure,
    RecoveryPrepareFailure,
    RecoveryRestartFailure,
    BroadcastFailure,
    Persistence,
    Session,
    Scheduler,
    Transport,
    Configuration,
}

impl TenancyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PreconditionViolation(_) => ErrorKind::PreconditionViolation,
            Self::LocalApply { .. } => ErrorKind::LocalApplyFailure,
            Self::RecoveryPrepare { .. } => ErrorKind::RecoveryPrepareFailure,
            Self::RecoveryRestart { .. } => ErrorKind::RecoveryRestartFailure,
            Self::Broadcast { .. } => ErrorKind::BroadcastFailure,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Session(_) => ErrorKind::Session,
            Self::Scheduler(_) => ErrorKind::Scheduler,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Illegal transition error, e.g. "Can't pause a tenant in state PAUSED"
    pub fn illegal_transition(verb: &str, status: TenantStatus) -> Self {
        Self::PreconditionViolation(format!("Can't {} a tenant in state {}", verb, status))
    }

    /// Failure raised by a tenant service
    pub fn service(
        service: impl Into<String>,
        action: ServiceAction,
        message: impl Into<String>,
    ) -> Self {
        Self::LocalApply {
            service: service.into(),
            action,
            message: message.into(),
        }
    }

    /// Per-peer outcomes captured by a failed broadcast
    pub fn broadcast_outcomes(&self) -> Option<&BTreeMap<NodeId, BroadcastOutcome>> {
        match self {
            Self::Broadcast { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }
}
