//! Cluster broadcaster
//!
//! Replicates an administrative action to every other node. When the caller
//! has a unit of work open, the send is deferred to an after-commit hook so
//! peers never observe a change the local node could still roll back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tenancy_types::{BroadcastOutcome, ClusterTask, NodeId, ServiceAction, TenancyEvent, TenantId};
use tracing::{debug, info, warn};

use crate::error::{TenancyError, TenancyResult};
use crate::events::EventAggregator;
use crate::ports::ClusterTransport;
use crate::transaction::UnitOfWork;

/// Default bound on the wait for all peers
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Fans administrative actions out to peer nodes
#[derive(Clone)]
pub struct ClusterBroadcaster {
    transport: Arc<dyn ClusterTransport>,
    timeout: Duration,
    events: EventAggregator,
}

impl ClusterBroadcaster {
    pub fn new(transport: Arc<dyn ClusterTransport>, events: EventAggregator) -> Self {
        Self {
            transport,
            timeout: DEFAULT_BROADCAST_TIMEOUT,
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `action` for `tenant_id` to every other node.
    ///
    /// With `Some(uow)` the send runs after `uow` commits and its failure is
    /// returned by the commit; with `None` it runs now.
    pub async fn fan_out(
        &self,
        action: ServiceAction,
        tenant_id: TenantId,
        uow: Option<&mut UnitOfWork>,
    ) -> TenancyResult<()> {
        let task = ClusterTask::new(action, tenant_id);
        match uow {
            Some(uow) => {
                debug!(%task, tx = %uow.id(), "Broadcast deferred until commit");
                let this = self.clone();
                uow.after_commit(format!("broadcast {}", task), move || async move {
                    this.send(task).await
                });
                Ok(())
            }
            None => self.send(task).await,
        }
    }

    /// Send immediately and aggregate the per-peer outcomes
    pub async fn send(&self, task: ClusterTask) -> TenancyResult<()> {
        debug!(%task, timeout = ?self.timeout, "Broadcasting to peers");
        let outcomes = self
            .transport
            .execute_on_others_and_wait(task, self.timeout)
            .await?;
        self.aggregate(task, outcomes)
    }

    fn aggregate(
        &self,
        task: ClusterTask,
        outcomes: BTreeMap<NodeId, BroadcastOutcome>,
    ) -> TenancyResult<()> {
        let failed_peers: Vec<NodeId> = outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(node, _)| node.clone())
            .collect();

        let Some(failed_node) = failed_peers.first().cloned() else {
            info!(%task, peers = outcomes.len(), "Broadcast acknowledged by all peers");
            return Ok(());
        };

        let cause = outcomes
            .get(&failed_node)
            .and_then(|o| o.cause())
            .unwrap_or_default()
            .to_string();
        warn!(%task, failed = failed_peers.len(), first = %failed_node, %cause, "Broadcast failed on peers");
        self.events.emit_warning(TenancyEvent::BroadcastFailed {
            tenant_id: task.tenant_id,
            action: task.action,
            failed_peers,
        });

        Err(TenancyError::Broadcast {
            action: task.action,
            tenant_id: task.tenant_id,
            failed_node,
            cause,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PeerFanOutTransport;
    use crate::error::ErrorKind;
    use crate::memory::{InMemoryTenantStore, ScriptedPeer};

    fn three_peers(slow: Duration) -> (Arc<PeerFanOutTransport>, Vec<Arc<ScriptedPeer>>) {
        let transport = Arc::new(PeerFanOutTransport::new(NodeId::from("node-0")));
        let peers = vec![
            Arc::new(ScriptedPeer::succeeding("peer1")),
            Arc::new(ScriptedPeer::delayed("peer2", slow)),
            Arc::new(ScriptedPeer::succeeding("peer3")),
        ];
        for peer in &peers {
            transport.add_peer(peer.clone());
        }
        (transport, peers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_one_peer_fails_the_broadcast() {
        let (transport, peers) = three_peers(Duration::from_secs(10 * 60));
        let broadcaster = ClusterBroadcaster::new(transport, EventAggregator::new(NodeId::from("node-0")));

        let err = broadcaster
            .fan_out(ServiceAction::Start, TenantId::new(7), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BroadcastFailure);
        assert!(err.to_string().contains("peer2"));
        let outcomes = err.broadcast_outcomes().unwrap();
        assert!(outcomes[&NodeId::from("peer1")].is_success());
        assert!(!outcomes[&NodeId::from("peer2")].is_success());
        assert!(outcomes[&NodeId::from("peer3")].is_success());
        assert_eq!(peers[0].received().len(), 1);
        assert_eq!(peers[2].received().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_within_timeout_succeeds() {
        let (transport, _) = three_peers(Duration::from_secs(60));
        let broadcaster = ClusterBroadcaster::new(transport, EventAggregator::new(NodeId::from("node-0")));

        broadcaster
            .fan_out(ServiceAction::Pause, TenantId::new(7), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_is_deferred_until_commit() {
        let transport = Arc::new(PeerFanOutTransport::new(NodeId::from("node-0")));
        let peer = Arc::new(ScriptedPeer::succeeding("peer1"));
        transport.add_peer(peer.clone());
        let broadcaster = ClusterBroadcaster::new(transport, EventAggregator::new(NodeId::from("node-0")));
        let store = Arc::new(InMemoryTenantStore::new());

        let mut uow = UnitOfWork::begin(store.clone()).await.unwrap();
        broadcaster
            .fan_out(ServiceAction::Pause, TenantId::new(42), Some(&mut uow))
            .await
            .unwrap();
        assert!(peer.received().is_empty());

        uow.commit().await.unwrap();
        assert_eq!(
            peer.received(),
            vec![ClusterTask::new(ServiceAction::Pause, TenantId::new(42))]
        );

        let mut uow = UnitOfWork::begin(store).await.unwrap();
        broadcaster
            .fan_out(ServiceAction::Resume, TenantId::new(42), Some(&mut uow))
            .await
            .unwrap();
        uow.rollback().await.unwrap();
        assert_eq!(peer.received().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_peer_is_reported_first_in_node_order() {
        let transport = Arc::new(PeerFanOutTransport::new(NodeId::from("node-0")));
        transport.add_peer(Arc::new(ScriptedPeer::failing("node-b", "disk full")));
        transport.add_peer(Arc::new(ScriptedPeer::succeeding("node-a")));
        transport.add_peer(Arc::new(ScriptedPeer::failing("node-c", "unreachable")));
        let events = EventAggregator::new(NodeId::from("node-0"));
        let mut rx = events.subscribe();
        let broadcaster = ClusterBroadcaster::new(transport, events);

        let err = broadcaster
            .fan_out(ServiceAction::Stop, TenantId::new(1), None)
            .await
            .unwrap_err();

        match err {
            TenancyError::Broadcast { failed_node, cause, .. } => {
                assert_eq!(failed_node, NodeId::from("node-b"));
                assert!(cause.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let envelope = rx.try_recv().unwrap();
        assert!(matches!(
            envelope.event,
            TenancyEvent::BroadcastFailed { ref failed_peers, .. } if failed_peers.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_no_peers_is_success() {
        let transport = Arc::new(PeerFanOutTransport::new(NodeId::from("solo")));
        let broadcaster = ClusterBroadcaster::new(transport, EventAggregator::new(NodeId::from("solo")));
        broadcaster
            .fan_out(ServiceAction::Start, TenantId::new(1), None)
            .await
            .unwrap();
    }
}
