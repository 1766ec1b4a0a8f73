//! Tenant services and recovery handlers of the demonstration node
//!
//! They only log what a real subsystem would do.

use async_trait::async_trait;
use tenancy_control::{RecoveryHandler, TenancyResult, TenantService};
use tenancy_types::TenantId;
use tracing::info;

/// A tenant-scoped subsystem that logs its transitions
#[derive(Debug, Clone)]
pub struct TracingService {
    name: String,
    node: String,
}

impl TracingService {
    pub fn new(name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
        }
    }
}

#[async_trait]
impl TenantService for TracingService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, service = %self.name, tenant_id = %tenant_id, "Service started");
        Ok(())
    }

    async fn stop(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, service = %self.name, tenant_id = %tenant_id, "Service stopped");
        Ok(())
    }

    async fn pause(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, service = %self.name, tenant_id = %tenant_id, "Service paused");
        Ok(())
    }

    async fn resume(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, service = %self.name, tenant_id = %tenant_id, "Service resumed");
        Ok(())
    }
}

/// Recovery of unfinished flow nodes
#[derive(Debug, Clone)]
pub struct FlowNodeRecovery {
    node: String,
}

impl FlowNodeRecovery {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

#[async_trait]
impl RecoveryHandler for FlowNodeRecovery {
    fn name(&self) -> &str {
        "flow-nodes"
    }

    async fn before_services_start(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, tenant_id = %tenant_id, "Marking unfinished flow nodes for recovery");
        Ok(())
    }

    async fn after_services_start(&self, tenant_id: TenantId) -> TenancyResult<()> {
        info!(node = %self.node, tenant_id = %tenant_id, "Resuming unfinished flow nodes");
        Ok(())
    }
}
