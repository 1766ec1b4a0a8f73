//! Per-node registry of tenant controllers
//!
//! A [`NodeRuntime`] holds exactly one [`TenantLifecycleController`] per
//! tenant, boots and shuts down all of them with the platform, and routes
//! replicated actions from peers to the right controller.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenancy_types::{ClusterTask, NodeId, TenantId};
use tracing::{debug, error, info, instrument};

use crate::config::TenancyConfig;
use crate::controller::{TenantLifecycleController, TenantPorts};
use crate::error::{TenancyError, TenancyResult};
use crate::events::EventAggregator;
use crate::ports::ClusterTaskHandler;

/// Tenant controllers hosted by one node
pub struct NodeRuntime {
    node_id: NodeId,
    config: TenancyConfig,
    ports: TenantPorts,
    events: EventAggregator,
    controllers: DashMap<TenantId, Arc<TenantLifecycleController>>,
}

impl NodeRuntime {
    pub fn new(node_id: NodeId, config: TenancyConfig, ports: TenantPorts) -> Self {
        let events = EventAggregator::new(node_id.clone());
        Self {
            node_id,
            config,
            ports,
            events,
            controllers: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// A controller wired to this node's ports, to be completed with
    /// services and recovery handlers and then registered
    pub fn new_controller(&self, tenant_id: TenantId) -> TenantLifecycleController {
        TenantLifecycleController::new(
            tenant_id,
            self.config.clone(),
            self.ports.clone(),
            self.events.clone(),
        )
    }

    /// Register the controller of a tenant. A tenant has one controller per node.
    pub fn register_tenant(
        &self,
        controller: TenantLifecycleController,
    ) -> TenancyResult<Arc<TenantLifecycleController>> {
        let tenant_id = controller.tenant_id();
        match self.controllers.entry(tenant_id) {
            Entry::Occupied(_) => Err(TenancyError::Configuration(
                format!("tenant {} already registered on node {}", tenant_id, self.node_id),
            )),
            Entry::Vacant(entry) => {
                let controller = Arc::new(controller);
                entry.insert(controller.clone());
                info!(node_id = %self.node_id, tenant_id = %tenant_id, "Tenant registered");
                Ok(controller)
            }
        }
    }

    pub fn controller(&self, tenant_id: TenantId) -> Option<Arc<TenantLifecycleController>> {
        self.controllers.get(&tenant_id).map(|c| c.value().clone())
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.controllers.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Start every registered tenant, in tenant id order.
    ///
    /// A failing tenant does not prevent the others from starting; failures
    /// are returned per tenant.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start_all(&self) -> Vec<(TenantId, TenancyError)> {
        let mut failures = Vec::new();
        for tenant_id in self.tenant_ids() {
            let Some(controller) = self.controller(tenant_id) else {
                continue;
            };
            if let Err(e) = controller.start().await {
                error!(tenant_id = %tenant_id, error = %e, "Tenant failed to start");
                failures.push((tenant_id, e));
            }
        }
        info!(
            tenants = self.controllers.len(),
            failed = failures.len(),
            "Tenants started"
        );
        failures
    }

    /// Stop every registered tenant, in tenant id order
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn stop_all(&self) -> Vec<(TenantId, TenancyError)> {
        let mut failures = Vec::new();
        for tenant_id in self.tenant_ids() {
            let Some(controller) = self.controller(tenant_id) else {
                continue;
            };
            if let Err(e) = controller.stop().await {
                error!(tenant_id = %tenant_id, error = %e, "Tenant failed to stop");
                failures.push((tenant_id, e));
            }
        }
        info!(
            tenants = self.controllers.len(),
            failed = failures.len(),
            "Tenants stopped"
        );
        failures
    }
}

#[async_trait]
impl ClusterTaskHandler for NodeRuntime {
    async fn execute_cluster_task(&self, task: ClusterTask) -> TenancyResult<()> {
        debug!(node_id = %self.node_id, %task, "Replicated task received");
        let controller = self.controller(task.tenant_id).ok_or_else(|| {
            TenancyError::Transport(format!(
                "tenant {} is not hosted on node {}",
                task.tenant_id, self.node_id
            ))
        })?;
        controller.execute_cluster_task(task).await
    }
}
