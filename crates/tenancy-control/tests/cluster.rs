//! Multi-node behaviour over an in-process cluster

use std::sync::Arc;
use std::time::Duration;

use tenancy_control::memory::{
    InMemoryJobScheduler, InMemorySessionStore, InMemoryTenantStore, ManualPlatformState,
    RecordingRecoveryHandler, RecordingTenantService, ScriptedPeer, ServiceCallLog,
};
use tenancy_control::{Principal, SessionStore};
use tenancy_control::{
    ClusterBroadcaster, ClusterTaskHandler, ErrorKind, EventAggregator, InProcessPeer, NodeRuntime,
    PeerFanOutTransport, StaticResponsibility, TenancyConfig, TenantLifecycleController,
    TenantPorts,
};
use tenancy_types::{
    LocalLifecycleState, NodeId, ServiceAction, TenancyEvent, TenancyEventEnvelope, TenantId,
    TenantStatus,
};
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

const TENANT: TenantId = TenantId::new(42);

struct Node {
    runtime: Arc<NodeRuntime>,
    transport: Arc<PeerFanOutTransport>,
    log: ServiceCallLog,
    handler: Arc<RecordingRecoveryHandler>,
}

impl Node {
    fn controller(&self) -> Arc<TenantLifecycleController> {
        self.runtime.controller(TENANT).expect("tenant registered")
    }

    fn state(&self) -> LocalLifecycleState {
        self.controller().lifecycle_state()
    }
}

/// Nodes sharing one tenant store, session store and scheduler; only the
/// first node is responsible for recovery.
struct Cluster {
    store: Arc<InMemoryTenantStore>,
    sessions: Arc<InMemorySessionStore>,
    scheduler: Arc<InMemoryJobScheduler>,
    nodes: Vec<Node>,
}

impl Cluster {
    fn new(size: usize, status: TenantStatus) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryTenantStore::with_tenant(TENANT, status));
        let sessions = Arc::new(InMemorySessionStore::new());
        let scheduler = Arc::new(InMemoryJobScheduler::new());

        let mut nodes = Vec::new();
        for i in 0..size {
            let node_id = NodeId::new(format!("node-{}", i + 1));
            let transport = Arc::new(PeerFanOutTransport::new(node_id.clone()));
            let ports = TenantPorts {
                store: store.clone(),
                transactions: store.clone(),
                sessions: sessions.clone(),
                scheduler: scheduler.clone(),
                platform: Arc::new(ManualPlatformState::new(true)),
                transport: transport.clone(),
                responsibility: Arc::new(StaticResponsibility::new(i == 0)),
            };
            let runtime = Arc::new(NodeRuntime::new(node_id, TenancyConfig::default(), ports));

            let log = ServiceCallLog::default();
            let handler = Arc::new(RecordingRecoveryHandler::new("flow-nodes"));
            let controller = runtime
                .new_controller(TENANT)
                .with_service(Arc::new(RecordingTenantService::new("engine", log.clone())))
                .with_recovery_handler(handler.clone());
            runtime.register_tenant(controller).unwrap();

            nodes.push(Node {
                runtime,
                transport,
                log,
                handler,
            });
        }

        for node in &nodes {
            for peer in &nodes {
                let handler: Arc<dyn ClusterTaskHandler> = peer.runtime.clone();
                node.transport.add_peer(Arc::new(InProcessPeer::new(
                    peer.runtime.node_id().clone(),
                    Arc::downgrade(&handler),
                )));
            }
        }

        Self {
            store,
            sessions,
            scheduler,
            nodes,
        }
    }

    fn status(&self) -> Option<TenantStatus> {
        self.store.committed_status(TENANT)
    }

    fn states(&self) -> Vec<LocalLifecycleState> {
        self.nodes.iter().map(Node::state).collect()
    }

    fn recovery_calls(&self) -> (usize, usize) {
        self.nodes.iter().fold((0, 0), |(before, after), node| {
            (
                before + node.handler.before_calls(),
                after + node.handler.after_calls(),
            )
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn wait_for_restart(events: &EventAggregator, rx: &mut Receiver<TenancyEventEnvelope>) {
    let node = events.node_id().clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(envelope) = rx.recv().await {
            if matches!(envelope.event, TenancyEvent::RecoveryRestarted { .. }) {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no recovery restart on {}", node));
}

#[tokio::test]
async fn activate_starts_tenant_on_every_node() {
    let cluster = Cluster::new(3, TenantStatus::Deactivated);
    let mut rx = cluster.nodes[0].runtime.events().subscribe();

    cluster.nodes[0].controller().activate().await.unwrap();
    wait_for_restart(cluster.nodes[0].runtime.events(), &mut rx).await;

    assert_eq!(cluster.status(), Some(TenantStatus::Activated));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Started; 3]);
    for node in &cluster.nodes {
        assert_eq!(node.log.names_for(ServiceAction::Start), vec!["engine"]);
    }
    // only the responsible node recovers
    assert_eq!(cluster.recovery_calls(), (1, 1));
    assert_eq!(cluster.nodes[0].handler.after_calls(), 1);
}

#[tokio::test]
async fn admin_actions_from_any_node_replicate() {
    let cluster = Cluster::new(3, TenantStatus::Activated);
    for node in &cluster.nodes {
        assert!(node.runtime.start_all().await.is_empty());
    }
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Started; 3]);

    cluster.nodes[1].controller().pause().await.unwrap();
    assert_eq!(cluster.status(), Some(TenantStatus::Paused));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Stopped; 3]);
    assert!(cluster.scheduler.is_paused(TENANT));
    for node in &cluster.nodes {
        assert!(!node.controller().supervisor().already_restarted());
    }

    let mut rx = cluster.nodes[0].runtime.events().subscribe();
    cluster.nodes[2].controller().resume().await.unwrap();
    wait_for_restart(cluster.nodes[0].runtime.events(), &mut rx).await;
    assert_eq!(cluster.status(), Some(TenantStatus::Activated));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Started; 3]);
    assert!(!cluster.scheduler.is_paused(TENANT));

    cluster.nodes[0].controller().deactivate().await.unwrap();
    assert_eq!(cluster.status(), Some(TenantStatus::Deactivated));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Stopped; 3]);
    for node in &cluster.nodes {
        assert_eq!(node.log.names_for(ServiceAction::Stop), vec!["engine"]);
    }
}

#[tokio::test]
async fn recovery_runs_once_per_cycle_across_the_cluster() {
    let cluster = Cluster::new(3, TenantStatus::Activated);
    let mut rx = cluster.nodes[0].runtime.events().subscribe();

    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }
    wait_for_restart(cluster.nodes[0].runtime.events(), &mut rx).await;
    assert_eq!(cluster.recovery_calls(), (1, 1));

    // a second boot without a stop does not recover again
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }
    assert_eq!(cluster.recovery_calls(), (1, 1));

    for node in &cluster.nodes {
        assert!(node.runtime.stop_all().await.is_empty());
    }
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }
    wait_for_restart(cluster.nodes[0].runtime.events(), &mut rx).await;
    assert_eq!(cluster.recovery_calls(), (2, 2));
}

#[tokio::test]
async fn unreachable_peer_fails_the_broadcast_after_local_commit() {
    let mut cluster = Cluster::new(3, TenantStatus::Activated);
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }
    let gone = cluster.nodes.pop().expect("three nodes");
    let gone_id = gone.runtime.node_id().clone();
    drop(gone);

    let err = cluster.nodes[0].controller().pause().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BroadcastFailure);
    assert!(err.to_string().contains(gone_id.as_str()));
    let outcomes = err.broadcast_outcomes().unwrap();
    assert!(outcomes[&NodeId::from("node-2")].is_success());
    assert!(!outcomes[&gone_id].is_success());
    assert_eq!(cluster.status(), Some(TenantStatus::Paused));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Stopped; 2]);
}

#[tokio::test(start_paused = true)]
async fn peer_timing_out_fails_after_five_minutes() {
    let transport = Arc::new(PeerFanOutTransport::new(NodeId::from("node-0")));
    let a = Arc::new(ScriptedPeer::succeeding("A"));
    let b = Arc::new(ScriptedPeer::succeeding("B"));
    let c = Arc::new(ScriptedPeer::delayed("C", Duration::from_secs(60 * 60)));
    transport.add_peer(a.clone());
    transport.add_peer(b.clone());
    transport.add_peer(c.clone());
    let broadcaster = ClusterBroadcaster::new(transport, EventAggregator::new(NodeId::from("node-0")));

    let started = Instant::now();
    let err = broadcaster
        .fan_out(ServiceAction::Start, TenantId::new(7), None)
        .await
        .unwrap_err();

    assert_eq!(started.elapsed(), Duration::from_secs(5 * 60));
    assert_eq!(err.kind(), ErrorKind::BroadcastFailure);
    assert!(err.to_string().contains("node C"));
    let outcomes = err.broadcast_outcomes().unwrap();
    assert!(outcomes[&NodeId::from("A")].is_success());
    assert!(outcomes[&NodeId::from("B")].is_success());
    assert!(!outcomes[&NodeId::from("C")].is_success());
    assert_eq!(c.received().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_on_one_node_start_services_once() {
    let cluster = Cluster::new(1, TenantStatus::Activated);
    let controller = cluster.nodes[0].controller();

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    let second = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(controller.lifecycle_state(), LocalLifecycleState::Started);
    assert_eq!(
        cluster.nodes[0].log.names_for(ServiceAction::Start),
        vec!["engine"]
    );
    assert_eq!(cluster.nodes[0].handler.before_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nodes_broadcasting_to_each_other_both_finish() {
    let cluster = Cluster::new(2, TenantStatus::Activated);
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }

    let first = tokio::spawn({
        let controller = cluster.nodes[0].controller();
        async move { controller.pause().await }
    });
    let second = tokio::spawn({
        let controller = cluster.nodes[1].controller();
        async move { controller.pause().await }
    });
    let (first, second) = tokio::time::timeout(Duration::from_secs(10), async {
        (first.await.unwrap(), second.await.unwrap())
    })
    .await
    .expect("crossed pauses finish");

    // the later pause may observe the committed PAUSED status
    let results = [first, second];
    assert!(results.iter().any(|r| r.is_ok()));
    for result in &results {
        if let Err(err) = result {
            assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        }
    }
    assert_eq!(cluster.status(), Some(TenantStatus::Paused));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Stopped; 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_races_platform_shutdown_of_a_peer() {
    let cluster = Cluster::new(2, TenantStatus::Activated);
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }

    let pausing = tokio::spawn({
        let controller = cluster.nodes[0].controller();
        async move { controller.pause().await }
    });
    let shutting_down = tokio::spawn({
        let runtime = cluster.nodes[1].runtime.clone();
        async move { runtime.stop_all().await }
    });
    let (paused, failures) = tokio::time::timeout(Duration::from_secs(10), async {
        (pausing.await.unwrap(), shutting_down.await.unwrap())
    })
    .await
    .expect("pause and shutdown finish");

    paused.unwrap();
    assert!(failures.is_empty());
    assert_eq!(cluster.status(), Some(TenantStatus::Paused));
    assert_eq!(cluster.states(), vec![LocalLifecycleState::Stopped; 2]);
    // the peer's services were brought down exactly once, by whichever came first
    let downs = cluster.nodes[1].log.names_for(ServiceAction::Stop).len()
        + cluster.nodes[1].log.names_for(ServiceAction::Pause).len();
    assert_eq!(downs, 1);
}

#[tokio::test]
async fn stop_on_one_node_clears_tenant_sessions_cluster_wide() {
    let cluster = Cluster::new(2, TenantStatus::Activated);
    for node in &cluster.nodes {
        node.runtime.start_all().await;
    }
    cluster
        .sessions
        .create_session(TENANT, Principal::user("walter"))
        .await
        .unwrap();
    let other = TenantId::new(7);
    cluster
        .sessions
        .create_session(other, Principal::user("jesse"))
        .await
        .unwrap();

    assert!(cluster.nodes[1].runtime.stop_all().await.is_empty());

    assert!(cluster.sessions.sessions_for(TENANT).is_empty());
    assert_eq!(cluster.sessions.sessions_for(other).len(), 1);
    assert_eq!(
        cluster.states(),
        vec![LocalLifecycleState::Started, LocalLifecycleState::Stopped]
    );
}
