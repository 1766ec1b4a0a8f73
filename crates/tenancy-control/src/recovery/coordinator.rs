//! Restart coordinator
//!
//! Runs the two recovery phases against the registered handlers:
//! `prepare` inside the unit of work that starts the services, and `restart`
//! on a background task once the services are up. Both phases are gated by
//! the [`RecoveryResponsibility`] decision and the [`RestartSupervisor`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tenancy_types::{TenancyEvent, TenantId};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::supervisor::RestartSupervisor;
use crate::error::{TenancyError, TenancyResult};
use crate::events::EventAggregator;
use crate::ports::{RecoveryHandler, RecoveryResponsibility};
use crate::transaction::UnitOfWork;

/// Drives recovery handlers around a services start
#[derive(Clone)]
pub struct RestartCoordinator {
    tenant_id: TenantId,
    handlers: Vec<Arc<dyn RecoveryHandler>>,
    supervisor: Arc<RestartSupervisor>,
    responsibility: Arc<dyn RecoveryResponsibility>,
    events: EventAggregator,
}

impl RestartCoordinator {
    pub fn new(
        tenant_id: TenantId,
        supervisor: Arc<RestartSupervisor>,
        responsibility: Arc<dyn RecoveryResponsibility>,
        events: EventAggregator,
    ) -> Self {
        Self {
            tenant_id,
            handlers: Vec::new(),
            supervisor,
            responsibility,
            events,
        }
    }

    /// Register a handler; handlers run in registration order
    pub fn with_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_handlers(
        mut self,
        handlers: impl IntoIterator<Item = Arc<dyn RecoveryHandler>>,
    ) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn supervisor(&self) -> &Arc<RestartSupervisor> {
        &self.supervisor
    }

    /// Run every `before_services_start` hook as part of `uow`.
    ///
    /// Returns whether the handlers ran. The first failure aborts the phase
    /// and must abort the enclosing unit of work.
    #[instrument(skip(self, uow), fields(tenant_id = %self.tenant_id, tx = %uow.id()))]
    pub async fn prepare(&self, uow: &UnitOfWork) -> TenancyResult<bool> {
        if !self.responsibility.is_responsible_for_recovery(self.tenant_id) {
            debug!("Node not responsible for recovery, skipping prepare");
            return Ok(false);
        }
        if !self.supervisor.should_prepare() {
            debug!("Unfinished work already restarted, skipping prepare");
            return Ok(false);
        }

        for handler in &self.handlers {
            handler
                .before_services_start(self.tenant_id)
                .await
                .map_err(|e| TenancyError::RecoveryPrepare {
                    handler: handler.name().to_string(),
                    tenant_id: self.tenant_id,
                    source: Box::new(e),
                })?;
        }

        info!(handlers = self.handlers.len(), "Recovery prepared");
        self.events.emit_info(TenancyEvent::RecoveryPrepared {
            tenant_id: self.tenant_id,
            handlers: self.handlers.len(),
        });
        Ok(true)
    }

    /// Dispatch every `after_services_start` hook on a background task.
    ///
    /// Does not wait for the handlers: the returned handle only exists for
    /// callers that want to observe completion. Returns `None` when this node
    /// is not responsible or the restart was already granted this cycle.
    pub fn restart(&self) -> Option<JoinHandle<()>> {
        if !self.responsibility.is_responsible_for_recovery(self.tenant_id) {
            debug!(tenant_id = %self.tenant_id, "Node not responsible for recovery, skipping restart");
            return None;
        }
        if !self.supervisor.grant_restart() {
            debug!(tenant_id = %self.tenant_id, "Restart already granted this cycle");
            return None;
        }

        let tenant_id = self.tenant_id;
        let handlers = self.handlers.clone();
        let events = self.events.clone();
        Some(tokio::spawn(async move {
            run_after_start(tenant_id, handlers, events).await;
        }))
    }
}

async fn run_after_start(
    tenant_id: TenantId,
    handlers: Vec<Arc<dyn RecoveryHandler>>,
    events: EventAggregator,
) {
    let mut failed = 0;
    for handler in &handlers {
        let outcome = AssertUnwindSafe(handler.after_services_start(tenant_id))
            .catch_unwind()
            .await;

        let (reason, source) = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => (e.to_string(), Some(Box::new(e))),
            Err(panic) => (panic_message(panic.as_ref()), None),
        };

        failed += 1;
        let err = TenancyError::RecoveryRestart {
            handler: handler.name().to_string(),
            tenant_id,
            message: reason.clone(),
            source,
        };
        error!(tenant_id = %tenant_id, error = %err, "Recovery handler failed after start");
        events.emit_error(TenancyEvent::RecoveryHandlerFailed {
            tenant_id,
            handler: handler.name().to_string(),
            reason,
        });
    }

    info!(tenant_id = %tenant_id, handlers = handlers.len(), failed, "Recovery restarted");
    events.emit_info(TenancyEvent::RecoveryRestarted {
        tenant_id,
        handlers: handlers.len(),
        failed,
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
