//! Fan-out transport over per-peer clients, plus an in-process peer.
//!
//! [`PeerFanOutTransport`] dispatches a task to all known peers concurrently
//! and waits for them against a single deadline. A peer that misses the
//! deadline is recorded as failed; peers that already answered keep their
//! outcome and are not retried.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tenancy_types::{BroadcastOutcome, ClusterTask, NodeId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{TenancyError, TenancyResult};
use crate::ports::{ClusterTaskHandler, ClusterTransport, PeerClient};

/// Cluster transport built from one client per remote node
pub struct PeerFanOutTransport {
    local_node: NodeId,
    peers: DashMap<NodeId, Arc<dyn PeerClient>>,
}

impl PeerFanOutTransport {
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            peers: DashMap::new(),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// Add (or replace) the client of a remote node. The local node is ignored.
    pub fn add_peer(&self, peer: Arc<dyn PeerClient>) {
        if peer.node_id() == &self.local_node {
            debug!(node_id = %self.local_node, "Ignoring local node as peer");
            return;
        }
        info!(peer = %peer.node_id(), "Peer joined");
        self.peers.insert(peer.node_id().clone(), peer);
    }

    pub fn remove_peer(&self, node_id: &NodeId) -> bool {
        let removed = self.peers.remove(node_id).is_some();
        if removed {
            info!(peer = %node_id, "Peer left");
        }
        removed
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ClusterTransport for PeerFanOutTransport {
    async fn execute_on_others_and_wait(
        &self,
        task: ClusterTask,
        timeout: Duration,
    ) -> TenancyResult<BTreeMap<NodeId, BroadcastOutcome>> {
        let peers: Vec<Arc<dyn PeerClient>> =
            self.peers.iter().map(|e| e.value().clone()).collect();
        let deadline = Instant::now() + timeout;

        let calls = peers.into_iter().map(|peer| async move {
            let node_id = peer.node_id().clone();
            let outcome = match tokio::time::timeout_at(deadline, peer.execute(task)).await {
                Ok(Ok(())) => BroadcastOutcome::Success,
                Ok(Err(e)) => BroadcastOutcome::failed(e.to_string()),
                Err(_) => {
                    warn!(peer = %node_id, %task, ?timeout, "Peer did not answer in time");
                    BroadcastOutcome::failed(format!("no response within {:?}", timeout))
                }
            };
            (node_id, outcome)
        });

        Ok(join_all(calls).await.into_iter().collect())
    }
}

/// Peer living in the same process, used by tests and the demonstration node
pub struct InProcessPeer {
    node_id: NodeId,
    handler: Weak<dyn ClusterTaskHandler>,
}

impl InProcessPeer {
    pub fn new(node_id: NodeId, handler: Weak<dyn ClusterTaskHandler>) -> Self {
        Self { node_id, handler }
    }
}

#[async_trait]
impl PeerClient for InProcessPeer {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn execute(&self, task: ClusterTask) -> TenancyResult<()> {
        let handler = self
            .handler
            .upgrade()
            .ok_or_else(|| TenancyError::Transport(format!("node {} is gone", self.node_id)))?;
        handler.execute_cluster_task(task).await
    }
}
