//! In-process cluster of tenancy nodes
//!
//! Every node gets its own transport and platform flag; the tenant store,
//! the session store and the job scheduler are shared, standing in for the
//! cluster-wide database.

use std::sync::Arc;

use tenancy_control::memory::{
    InMemoryJobScheduler, InMemorySessionStore, InMemoryTenantStore, ManualPlatformState,
};
use tenancy_control::{
    ClusterTaskHandler, InProcessPeer, NodeRuntime, PeerFanOutTransport, StaticResponsibility,
    TenantPorts,
};
use tenancy_types::{LocalLifecycleState, NodeId, TenantId, TenantStatus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::services::{FlowNodeRecovery, TracingService};

/// Administrative action issued from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AdminAction {
    Start,
    Stop,
    Pause,
    Resume,
    Activate,
    Deactivate,
}

/// Persisted status and per-node state of one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantReport {
    pub tenant_id: TenantId,
    pub status: Option<TenantStatus>,
    pub nodes: Vec<(NodeId, LocalLifecycleState)>,
}

struct ClusterNode {
    runtime: Arc<NodeRuntime>,
    platform: Arc<ManualPlatformState>,
    event_log: JoinHandle<()>,
}

/// Nodes wired to each other in one process
pub struct LocalCluster {
    store: Arc<InMemoryTenantStore>,
    sessions: Arc<InMemorySessionStore>,
    nodes: Vec<ClusterNode>,
}

impl LocalCluster {
    /// Build the nodes and register every configured tenant on each of them
    pub fn build(config: &NodeConfig) -> NodeResult<Self> {
        config.validate()?;

        let store = Arc::new(InMemoryTenantStore::new());
        for seed in &config.tenants {
            store.insert_tenant(seed.tenant_id(), seed.status);
        }
        let sessions = Arc::new(InMemorySessionStore::new());
        let scheduler = Arc::new(InMemoryJobScheduler::new());

        let mut nodes = Vec::with_capacity(config.cluster.nodes);
        let mut transports = Vec::with_capacity(config.cluster.nodes);
        for index in 0..config.cluster.nodes {
            let node_id = NodeId::new(format!("node-{}", index + 1));
            let platform = Arc::new(ManualPlatformState::new(false));
            let transport = Arc::new(PeerFanOutTransport::new(node_id.clone()));
            let responsible = index == config.cluster.responsible_node
                && config.tenancy.responsible_for_recovery;
            let ports = TenantPorts {
                store: store.clone(),
                transactions: store.clone(),
                sessions: sessions.clone(),
                scheduler: scheduler.clone(),
                platform: platform.clone(),
                transport: transport.clone(),
                responsibility: Arc::new(StaticResponsibility::new(responsible)),
            };
            let runtime = Arc::new(NodeRuntime::new(
                node_id.clone(),
                config.tenancy.clone(),
                ports,
            ));

            for seed in &config.tenants {
                let mut controller = runtime.new_controller(seed.tenant_id());
                for service in &config.services {
                    controller = controller
                        .with_service(Arc::new(TracingService::new(service, node_id.as_str())));
                }
                controller = controller
                    .with_recovery_handler(Arc::new(FlowNodeRecovery::new(node_id.as_str())));
                runtime.register_tenant(controller)?;
            }

            info!(node_id = %node_id, responsible, "Node created");
            let event_log = log_events(&runtime);
            nodes.push(ClusterNode {
                runtime,
                platform,
                event_log,
            });
            transports.push(transport);
        }

        for transport in &transports {
            for node in &nodes {
                let handler: Arc<dyn ClusterTaskHandler> = node.runtime.clone();
                transport.add_peer(Arc::new(InProcessPeer::new(
                    node.runtime.node_id().clone(),
                    Arc::downgrade(&handler),
                )));
            }
        }

        Ok(Self {
            store,
            sessions,
            nodes,
        })
    }

    /// Session store shared by every node
    pub fn sessions(&self) -> &Arc<InMemorySessionStore> {
        &self.sessions
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(|n| n.runtime.node_id().clone())
            .collect()
    }

    pub fn node(&self, node_id: &str) -> NodeResult<&Arc<NodeRuntime>> {
        self.nodes
            .iter()
            .map(|n| &n.runtime)
            .find(|r| r.node_id().as_str() == node_id)
            .ok_or_else(|| NodeError::Unknown {
                kind: "node",
                name: node_id.to_string(),
            })
    }

    /// Platform boot: mark every node started and start its tenants.
    /// Returns the number of tenants that failed to start.
    pub async fn boot(&self) -> usize {
        let mut failed = 0;
        for node in &self.nodes {
            node.platform.set_started(true);
            failed += node.runtime.start_all().await.len();
        }
        info!(nodes = self.nodes.len(), failed, "Cluster booted");
        failed
    }

    /// Run one administrative action on one node
    pub async fn run(&self, node_id: &str, tenant_id: TenantId, action: AdminAction) -> NodeResult<()> {
        let node = self.node(node_id)?;
        let controller = node.controller(tenant_id).ok_or_else(|| NodeError::Unknown {
            kind: "tenant",
            name: tenant_id.to_string(),
        })?;

        info!(node_id = %node_id, tenant_id = %tenant_id, ?action, "Running administrative action");
        match action {
            AdminAction::Start => controller.start().await?,
            AdminAction::Stop => controller.stop().await?,
            AdminAction::Pause => controller.pause().await?,
            AdminAction::Resume => controller.resume().await?,
            AdminAction::Activate => controller.activate().await?,
            AdminAction::Deactivate => controller.deactivate().await?,
        }
        Ok(())
    }

    /// Status of every tenant across the cluster, in tenant id order
    pub fn report(&self) -> Vec<TenantReport> {
        let Some(first) = self.nodes.first() else {
            return Vec::new();
        };
        first
            .runtime
            .tenant_ids()
            .into_iter()
            .map(|tenant_id| TenantReport {
                tenant_id,
                status: self.store.committed_status(tenant_id),
                nodes: self
                    .nodes
                    .iter()
                    .filter_map(|n| {
                        n.runtime
                            .controller(tenant_id)
                            .map(|c| (n.runtime.node_id().clone(), c.lifecycle_state()))
                    })
                    .collect(),
            })
            .collect()
    }

    /// Platform shutdown: stop every tenant on every node
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            let failures = node.runtime.stop_all().await;
            if !failures.is_empty() {
                warn!(node_id = %node.runtime.node_id(), failed = failures.len(), "Tenants failed to stop");
            }
            node.platform.set_started(false);
            node.event_log.abort();
        }
        info!("Cluster shut down");
    }
}

fn log_events(runtime: &NodeRuntime) -> JoinHandle<()> {
    let mut rx = runtime.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => info!(
                    node_id = %envelope.node_id,
                    severity = ?envelope.severity,
                    event = ?envelope.event,
                    "Tenancy event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
