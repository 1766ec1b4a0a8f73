//! Boundary contracts consumed by the lifecycle runtime
//!
//! Implementations live outside this crate (database, scheduler, cluster
//! transport). The [`crate::memory`] module provides in-memory versions used
//! by tests and the demonstration node.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tenancy_types::{BroadcastOutcome, ClusterTask, NodeId, SessionId, TenantId, TenantStatus};

use crate::error::TenancyResult;
use crate::session::Principal;
use crate::transaction::TransactionId;

/// Durable tenant status, read and written inside a transaction
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Status of a tenant as seen by the transaction
    async fn status(&self, tx: TransactionId, tenant_id: TenantId) -> TenancyResult<TenantStatus>;

    /// Stage a status change; visible to others once `tx` commits
    async fn set_status(
        &self,
        tx: TransactionId,
        tenant_id: TenantId,
        status: TenantStatus,
    ) -> TenancyResult<()>;
}

/// Transaction boundaries of the persistence layer
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> TenancyResult<TransactionId>;

    async fn commit(&self, tx: TransactionId) -> TenancyResult<()>;

    async fn rollback(&self, tx: TransactionId) -> TenancyResult<()>;
}

/// A tenant-scoped subsystem with a uniform lifecycle
/// (scheduler bindings, classloader, session store, connectors...).
#[async_trait]
pub trait TenantService: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, tenant_id: TenantId) -> TenancyResult<()>;

    async fn stop(&self, tenant_id: TenantId) -> TenancyResult<()>;

    async fn pause(&self, tenant_id: TenantId) -> TenancyResult<()>;

    async fn resume(&self, tenant_id: TenantId) -> TenancyResult<()>;
}

/// Resumes process elements left mid-execution by a stop or crash
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Runs inside the unit of work that starts the services.
    async fn before_services_start(&self, tenant_id: TenantId) -> TenancyResult<()>;

    /// Runs on a background task once services are up.
    async fn after_services_start(&self, tenant_id: TenantId) -> TenancyResult<()>;
}

/// Decides whether this node recovers a tenant's unfinished work.
///
/// The designation mechanism (fixed configuration, election, lock) is
/// external; the runtime only consults the answer.
pub trait RecoveryResponsibility: Send + Sync {
    fn is_responsible_for_recovery(&self, tenant_id: TenantId) -> bool;
}

/// Fan-out contract of the cluster transport
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Deliver `task` to every other node, waiting at most `timeout`
    /// for all of them.
    async fn execute_on_others_and_wait(
        &self,
        task: ClusterTask,
        timeout: Duration,
    ) -> TenancyResult<BTreeMap<NodeId, BroadcastOutcome>>;
}

/// Client for one remote node
#[async_trait]
pub trait PeerClient: Send + Sync {
    fn node_id(&self) -> &NodeId;

    async fn execute(&self, task: ClusterTask) -> TenancyResult<()>;
}

/// Receiving side of a cluster task
#[async_trait]
pub trait ClusterTaskHandler: Send + Sync {
    async fn execute_cluster_task(&self, task: ClusterTask) -> TenancyResult<()>;
}

/// Session storage. The current session of a task lives in [`crate::session`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        tenant_id: TenantId,
        principal: Principal,
    ) -> TenancyResult<SessionId>;

    async fn delete_session(&self, session_id: SessionId) -> TenancyResult<()>;

    /// Delete every session of a tenant, optionally keeping technical ones.
    /// Returns the number of sessions removed.
    async fn delete_sessions(&self, tenant_id: TenantId, keep_technical: bool)
        -> TenancyResult<usize>;
}

/// Tenant job scheduling
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn pause_jobs(&self, tenant_id: TenantId) -> TenancyResult<()>;

    async fn resume_jobs(&self, tenant_id: TenantId) -> TenancyResult<()>;
}

/// Whether the hosting platform is running
pub trait PlatformState: Send + Sync {
    fn is_started(&self) -> bool;
}
