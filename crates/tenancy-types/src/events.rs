//! Event types for tenancy observability
//!
//! Events provide a unified stream of tenant lifecycle activity on a node.

use crate::{NodeId, ServiceAction, TenantId, TenantStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all tenancy events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Node that emitted the event
    pub node_id: NodeId,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: TenancyEvent,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Tenant lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TenancyEvent {
    /// Persisted status committed
    StatusChanged {
        tenant_id: TenantId,
        from: TenantStatus,
        to: TenantStatus,
    },

    /// Local services moved by an action
    ServicesApplied {
        tenant_id: TenantId,
        action: ServiceAction,
    },

    /// Pre-start recovery handlers ran on this node
    RecoveryPrepared {
        tenant_id: TenantId,
        handlers: usize,
    },

    /// Post-start recovery finished on this node
    RecoveryRestarted {
        tenant_id: TenantId,
        handlers: usize,
        failed: usize,
    },

    /// A post-start recovery handler failed
    RecoveryHandlerFailed {
        tenant_id: TenantId,
        handler: String,
        reason: String,
    },

    /// One or more peers did not apply a broadcast action
    BroadcastFailed {
        tenant_id: TenantId,
        action: ServiceAction,
        failed_peers: Vec<NodeId>,
    },
}

impl TenancyEvent {
    /// Tenant the event refers to
    pub fn tenant_id(&self) -> TenantId {
        match self {
            Self::StatusChanged { tenant_id, .. }
            | Self::ServicesApplied { tenant_id, .. }
            | Self::RecoveryPrepared { tenant_id, .. }
            | Self::RecoveryRestarted { tenant_id, .. }
            | Self::RecoveryHandlerFailed { tenant_id, .. }
            | Self::BroadcastFailed { tenant_id, .. } => *tenant_id,
        }
    }
}
