//! Event aggregation for tenant lifecycle activity
//!
//! The EventAggregator publishes lifecycle events of one node on a broadcast
//! channel for monitoring and audit. Publishing never blocks and never fails;
//! with no subscriber the event is dropped.

use tenancy_types::{EventSeverity, NodeId, TenancyEvent, TenancyEventEnvelope};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for the event stream
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Publishes tenancy events for one node
#[derive(Clone)]
pub struct EventAggregator {
    node_id: NodeId,
    tx: broadcast::Sender<TenancyEventEnvelope>,
}

impl EventAggregator {
    pub fn new(node_id: NodeId) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { node_id, tx }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<TenancyEventEnvelope> {
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event
    pub fn emit(&self, event: TenancyEvent, severity: EventSeverity) {
        debug!(node_id = %self.node_id, ?event, "Emitting tenancy event");
        let envelope = TenancyEventEnvelope {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            node_id: self.node_id.clone(),
            severity,
            event,
        };
        let _ = self.tx.send(envelope);
    }

    pub fn emit_info(&self, event: TenancyEvent) {
        self.emit(event, EventSeverity::Info);
    }

    pub fn emit_warning(&self, event: TenancyEvent) {
        self.emit(event, EventSeverity::Warning);
    }

    pub fn emit_error(&self, event: TenancyEvent) {
        self.emit(event, EventSeverity::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenancy_types::{ServiceAction, TenantId};
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_emission() {
        let aggregator = EventAggregator::new(NodeId::from("node-1"));
        let mut rx = aggregator.subscribe();

        aggregator.emit_info(TenancyEvent::ServicesApplied {
            tenant_id: TenantId::new(42),
            action: ServiceAction::Start,
        });

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(received.node_id, NodeId::from("node-1"));
        assert_eq!(received.severity, EventSeverity::Info);
        assert_eq!(received.event.tenant_id(), TenantId::new(42));
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let aggregator = EventAggregator::new(NodeId::from("node-1"));
        assert_eq!(aggregator.subscriber_count(), 0);

        aggregator.emit_error(TenancyEvent::RecoveryHandlerFailed {
            tenant_id: TenantId::new(1),
            handler: "flow-nodes".into(),
            reason: "boom".into(),
        });
    }

    #[test]
    fn test_severity_helpers() {
        let aggregator = EventAggregator::new(NodeId::from("node-2"));
        let mut rx = aggregator.subscribe();

        aggregator.emit_warning(TenancyEvent::BroadcastFailed {
            tenant_id: TenantId::new(3),
            action: ServiceAction::Pause,
            failed_peers: vec![NodeId::from("node-3")],
        });

        match rx.try_recv() {
            Ok(envelope) => assert_eq!(envelope.severity, EventSeverity::Warning),
            Err(_) => panic!("Expected to receive event"),
        }
    }
}
