//! Tenant lifecycle controller
//!
//! The operator-facing state machine of one tenant on one node. It composes
//! the session scope, the service switch, the restart supervisor and
//! coordinator, and the cluster broadcaster behind six administrative
//! operations plus the peer-side execution of replicated actions.
//!
//! Local administrative operations on a controller are serialized by an
//! operation lock. Peer-side execution does not take that lock; it relies on
//! the compare-and-set transitions of the local lifecycle state, so two nodes
//! replicating to each other cannot deadlock.

use std::sync::Arc;

use async_trait::async_trait;
use tenancy_types::{
    ClusterTask, LocalLifecycleState, ServiceAction, TenancyEvent, TenantId, TenantStatus,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterBroadcaster;
use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};
use crate::events::EventAggregator;
use crate::ports::{
    ClusterTaskHandler, ClusterTransport, JobScheduler, PlatformState, RecoveryHandler,
    RecoveryResponsibility, SessionStore, TenantService, TenantStore, TransactionManager,
};
use crate::recovery::{RestartCoordinator, RestartSupervisor};
use crate::services::ServiceStateSwitch;
use crate::session::SessionScope;
use crate::state::LifecycleCell;
use crate::transaction::{CommitHooks, UnitOfWork};

use tenancy_types::LocalLifecycleState::{Started, Starting, Stopped, Stopping};

/// Collaborators shared by every controller of a node
#[derive(Clone)]
pub struct TenantPorts {
    pub store: Arc<dyn TenantStore>,
    pub transactions: Arc<dyn TransactionManager>,
    pub sessions: Arc<dyn SessionStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub platform: Arc<dyn PlatformState>,
    pub transport: Arc<dyn ClusterTransport>,
    pub responsibility: Arc<dyn RecoveryResponsibility>,
}

/// Lifecycle state machine of one tenant on one node
pub struct TenantLifecycleController {
    tenant_id: TenantId,
    config: TenancyConfig,
    ports: TenantPorts,
    state: LifecycleCell,
    operation_lock: Mutex<()>,
    switch: ServiceStateSwitch,
    supervisor: Arc<RestartSupervisor>,
    coordinator: RestartCoordinator,
    broadcaster: ClusterBroadcaster,
    scope: SessionScope,
    events: EventAggregator,
}

impl TenantLifecycleController {
    /// Create a controller with no services and no recovery handlers
    pub fn new(
        tenant_id: TenantId,
        config: TenancyConfig,
        ports: TenantPorts,
        events: EventAggregator,
    ) -> Self {
        let supervisor = Arc::new(RestartSupervisor::new(tenant_id));
        let coordinator = RestartCoordinator::new(
            tenant_id,
            supervisor.clone(),
            ports.responsibility.clone(),
            events.clone(),
        );
        let broadcaster = ClusterBroadcaster::new(ports.transport.clone(), events.clone())
            .with_timeout(config.broadcast_timeout());
        let scope = SessionScope::new(tenant_id, config.technical_user.clone(), ports.sessions.clone());
        let switch = ServiceStateSwitch::new(tenant_id, ports.transactions.clone());

        Self {
            tenant_id,
            config,
            ports,
            state: LifecycleCell::default(),
            operation_lock: Mutex::new(()),
            switch,
            supervisor,
            coordinator,
            broadcaster,
            scope,
            events,
        }
    }

    /// Register a tenant service; registration order is start order
    pub fn with_service(mut self, service: Arc<dyn TenantService>) -> Self {
        self.switch = self.switch.with_service(service);
        self
    }

    /// Register a recovery handler
    pub fn with_recovery_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.coordinator = self.coordinator.with_handler(handler);
        self
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn lifecycle_state(&self) -> LocalLifecycleState {
        self.state.get()
    }

    pub fn is_started(&self) -> bool {
        self.state.get() == Started
    }

    pub fn supervisor(&self) -> &Arc<RestartSupervisor> {
        &self.supervisor
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn service_names(&self) -> Vec<String> {
        self.switch.service_names()
    }

    /// Persisted status, read in a transaction of its own
    pub async fn status(&self) -> TenancyResult<TenantStatus> {
        let uow = self.begin().await?;
        let result = self.ports.store.status(uow.id(), self.tenant_id).await;
        uow.complete(result).await
    }

    // ========== Administrative operations ==========

    /// Start the tenant's services on this node if the tenant is activated.
    ///
    /// A no-op unless the local state is `STOPPED`. A tenant that is not
    /// activated is left stopped without error.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn start(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        if let Err(observed) = self.state.transition(Stopped, Starting) {
            debug!(state = %observed, "Tenant not stopped, start skipped");
            return Ok(());
        }

        match self.resume_on_boot().await {
            Ok(Some(hooks)) => {
                self.state.set(Started);
                self.services_applied(ServiceAction::Start);
                info!("Tenant started");
                hooks.run().await
            }
            Ok(None) => {
                self.state.set(Stopped);
                debug!("Tenant not activated, start skipped");
                Ok(())
            }
            Err(e) => {
                self.state.set(Stopped);
                warn!(error = %e, "Tenant start failed");
                Err(e)
            }
        }
    }

    /// Stop the tenant's services on this node.
    ///
    /// A no-op unless the local state is `STARTED`.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn stop(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        if let Err(observed) = self.state.transition(Started, Stopping) {
            debug!(state = %observed, "Tenant not started, stop skipped");
            return Ok(());
        }

        match self.shut_down().await {
            Ok(()) => {
                self.supervisor.on_stop();
                self.state.set(Stopped);
                self.services_applied(ServiceAction::Stop);
                info!("Tenant stopped");
                Ok(())
            }
            Err(e) => {
                self.state.set(Started);
                warn!(error = %e, "Tenant stop failed");
                Err(e)
            }
        }
    }

    /// Pause an activated tenant cluster-wide
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn pause(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        let mut uow = self.begin().await?;
        let mut claimed = false;
        let result = self.pause_in(&mut uow, &mut claimed).await;
        let (stopped, hooks) = match self.settle(uow, result).await {
            Ok(settled) => settled,
            Err(e) => {
                if claimed {
                    self.state.set(Started);
                }
                return Err(e);
            }
        };

        self.supervisor.on_pause();
        if stopped {
            self.state.set(Stopped);
            self.services_applied(ServiceAction::Pause);
        }
        self.status_changed(TenantStatus::Activated, TenantStatus::Paused);
        info!("Tenant paused");
        hooks.run().await
    }

    /// Resume a paused tenant cluster-wide
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn resume(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        let mut uow = self.begin().await?;
        let mut claimed = false;
        let result = self.resume_in(&mut uow, &mut claimed).await;
        let (started, hooks) = match self.settle(uow, result).await {
            Ok(settled) => settled,
            Err(e) => {
                if claimed {
                    self.state.set(Stopped);
                }
                return Err(e);
            }
        };

        if started {
            self.state.set(Started);
            self.services_applied(ServiceAction::Resume);
        }
        self.status_changed(TenantStatus::Paused, TenantStatus::Activated);
        info!(started, "Tenant resumed");
        hooks.run().await
    }

    /// Activate a deactivated tenant.
    ///
    /// Starts the services cluster-wide when the platform is running;
    /// otherwise only the status is persisted and the start is deferred to
    /// the next platform boot.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn activate(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        let mut uow = self.begin().await?;
        let mut claimed = false;
        let result = self.activate_in(&mut uow, &mut claimed).await;
        let (started, hooks) = match self.settle(uow, result).await {
            Ok(settled) => settled,
            Err(e) => {
                if claimed {
                    self.state.set(Stopped);
                }
                return Err(e);
            }
        };

        if started {
            self.state.set(Started);
            self.services_applied(ServiceAction::Start);
        }
        self.status_changed(TenantStatus::Deactivated, TenantStatus::Activated);
        info!(started, "Tenant activated");
        hooks.run().await
    }

    /// Deactivate an activated or paused tenant
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn deactivate(&self) -> TenancyResult<()> {
        let _guard = self.operation_lock.lock().await;
        let mut uow = self.begin().await?;
        let mut claimed = false;
        let result = self.deactivate_in(&mut uow, &mut claimed).await;
        let ((previous, stopped), hooks) = match self.settle(uow, result).await {
            Ok(settled) => settled,
            Err(e) => {
                if claimed {
                    self.state.set(Started);
                }
                return Err(e);
            }
        };

        if stopped {
            self.supervisor.on_stop();
            self.state.set(Stopped);
            self.services_applied(ServiceAction::Stop);
        }
        self.status_changed(previous, TenantStatus::Deactivated);
        info!(%previous, "Tenant deactivated");
        hooks.run().await
    }

    // ========== Transactional steps ==========

    async fn resume_on_boot(&self) -> TenancyResult<Option<CommitHooks>> {
        let mut uow = self.begin().await?;
        let status = match self.ports.store.status(uow.id(), self.tenant_id).await {
            Ok(status) => status,
            Err(e) => return self.settle::<()>(uow, Err(e)).await.map(|_| None),
        };
        if status != TenantStatus::Activated {
            uow.rollback().await?;
            return Ok(None);
        }

        let result = self.bring_up(&uow, ServiceAction::Start).await;
        if result.is_ok() {
            self.restart_after_commit(&mut uow);
            self.resume_jobs_after_commit(&mut uow);
        }
        let ((), hooks) = self.settle(uow, result).await?;
        Ok(Some(hooks))
    }

    async fn shut_down(&self) -> TenancyResult<()> {
        if self.config.clear_sessions_on_stop {
            let removed = self
                .ports
                .sessions
                .delete_sessions(self.tenant_id, false)
                .await?;
            debug!(removed, "Tenant sessions cleared");
        }
        self.scope
            .run(|_| self.switch.apply_in_new_unit(ServiceAction::Stop))
            .await
    }

    /// Returns whether local services were paused. `claimed` reports a
    /// local state transition the caller must revert on failure.
    async fn pause_in(&self, uow: &mut UnitOfWork, claimed: &mut bool) -> TenancyResult<bool> {
        let status = self.ports.store.status(uow.id(), self.tenant_id).await?;
        if status != TenantStatus::Activated {
            return Err(TenancyError::illegal_transition("pause", status));
        }

        let removed = self
            .ports
            .sessions
            .delete_sessions(self.tenant_id, true)
            .await?;
        debug!(removed, "User sessions deleted");
        self.ports
            .store
            .set_status(uow.id(), self.tenant_id, TenantStatus::Paused)
            .await?;

        let stopping = self.state.transition(Started, Stopping).is_ok();
        *claimed = stopping;
        if stopping {
            self.bring_down(uow, ServiceAction::Pause).await?;
        }

        self.pause_jobs_after_commit(uow);
        self.broadcaster
            .fan_out(ServiceAction::Pause, self.tenant_id, Some(&mut *uow))
            .await?;
        Ok(stopping)
    }

    /// Returns whether local services were resumed
    async fn resume_in(&self, uow: &mut UnitOfWork, claimed: &mut bool) -> TenancyResult<bool> {
        let status = self.ports.store.status(uow.id(), self.tenant_id).await?;
        if status != TenantStatus::Paused {
            return Err(TenancyError::illegal_transition("resume", status));
        }

        self.ports
            .store
            .set_status(uow.id(), self.tenant_id, TenantStatus::Activated)
            .await?;

        let starting = self.claim_start();
        *claimed = starting;
        if starting {
            self.bring_up(uow, ServiceAction::Resume).await?;
            self.restart_after_commit(uow);
        }

        self.broadcaster
            .fan_out(ServiceAction::Resume, self.tenant_id, Some(&mut *uow))
            .await?;
        self.resume_jobs_after_commit(uow);
        Ok(starting)
    }

    /// Returns whether local services were started
    async fn activate_in(&self, uow: &mut UnitOfWork, claimed: &mut bool) -> TenancyResult<bool> {
        let status = self.ports.store.status(uow.id(), self.tenant_id).await?;
        if status != TenantStatus::Deactivated {
            return Err(TenancyError::illegal_transition("activate", status));
        }

        self.ports
            .store
            .set_status(uow.id(), self.tenant_id, TenantStatus::Activated)
            .await?;

        if !self.ports.platform.is_started() {
            info!("Platform not started, tenant start deferred");
            return Ok(false);
        }

        let starting = self.claim_start();
        *claimed = starting;
        if starting {
            self.bring_up(uow, ServiceAction::Start).await?;
            self.restart_after_commit(uow);
        }

        self.broadcaster
            .fan_out(ServiceAction::Start, self.tenant_id, Some(&mut *uow))
            .await?;
        self.resume_jobs_after_commit(uow);
        Ok(starting)
    }

    /// Returns the previous status and whether local services were stopped
    async fn deactivate_in(
        &self,
        uow: &mut UnitOfWork,
        claimed: &mut bool,
    ) -> TenancyResult<(TenantStatus, bool)> {
        let previous = self.ports.store.status(uow.id(), self.tenant_id).await?;
        if previous == TenantStatus::Deactivated {
            return Err(TenancyError::illegal_transition("deactivate", previous));
        }

        let removed = self
            .ports
            .sessions
            .delete_sessions(self.tenant_id, true)
            .await?;
        debug!(removed, "User sessions deleted");
        self.ports
            .store
            .set_status(uow.id(), self.tenant_id, TenantStatus::Deactivated)
            .await?;

        if previous != TenantStatus::Activated {
            return Ok((previous, false));
        }

        let stopping = self.state.transition(Started, Stopping).is_ok();
        *claimed = stopping;
        if stopping {
            self.bring_down(uow, ServiceAction::Stop).await?;
        }

        self.broadcaster
            .fan_out(ServiceAction::Stop, self.tenant_id, Some(&mut *uow))
            .await?;
        self.pause_jobs_after_commit(uow);
        Ok((previous, stopping))
    }

    // ========== Building blocks ==========

    async fn begin(&self) -> TenancyResult<UnitOfWork> {
        UnitOfWork::begin(self.ports.transactions.clone()).await
    }

    /// Commit on success and detach the hooks, roll back on failure
    async fn settle<T>(
        &self,
        uow: UnitOfWork,
        result: TenancyResult<T>,
    ) -> TenancyResult<(T, CommitHooks)> {
        match result {
            Ok(value) => Ok((value, uow.commit_detached().await?)),
            Err(e) => {
                let tx = uow.id();
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(%tx, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Local services must be stopped and the platform running
    fn claim_start(&self) -> bool {
        if !self.ports.platform.is_started() {
            return false;
        }
        match self.state.transition(Stopped, Starting) {
            Ok(()) => true,
            Err(observed) => {
                debug!(state = %observed, "Local services not stopped, start skipped");
                false
            }
        }
    }

    /// Prepare recovery and bring services up under a technical session
    async fn bring_up(&self, uow: &UnitOfWork, action: ServiceAction) -> TenancyResult<()> {
        self.scope
            .run(|_| async move {
                self.coordinator.prepare(uow).await?;
                self.switch.apply(uow, action).await
            })
            .await
    }

    async fn bring_down(&self, uow: &UnitOfWork, action: ServiceAction) -> TenancyResult<()> {
        self.scope
            .run(|_| self.switch.apply(uow, action))
            .await
    }

    fn restart_after_commit(&self, uow: &mut UnitOfWork) {
        let coordinator = self.coordinator.clone();
        uow.after_commit("recovery restart", move || async move {
            if coordinator.restart().is_some() {
                debug!("Recovery restart dispatched");
            }
            Ok(())
        });
    }

    fn resume_jobs_after_commit(&self, uow: &mut UnitOfWork) {
        let scheduler = self.ports.scheduler.clone();
        let tenant_id = self.tenant_id;
        uow.after_commit("resume jobs", move || async move {
            scheduler.resume_jobs(tenant_id).await
        });
    }

    fn pause_jobs_after_commit(&self, uow: &mut UnitOfWork) {
        let scheduler = self.ports.scheduler.clone();
        let tenant_id = self.tenant_id;
        uow.after_commit("pause jobs", move || async move {
            scheduler.pause_jobs(tenant_id).await
        });
    }

    fn status_changed(&self, from: TenantStatus, to: TenantStatus) {
        self.events.emit_info(TenancyEvent::StatusChanged {
            tenant_id: self.tenant_id,
            from,
            to,
        });
    }

    fn services_applied(&self, action: ServiceAction) {
        self.events.emit_info(TenancyEvent::ServicesApplied {
            tenant_id: self.tenant_id,
            action,
        });
    }

    // ========== Peer side ==========

    async fn apply_remote_bring_up(&self, action: ServiceAction) -> TenancyResult<()> {
        if let Err(observed) = self.state.transition(Stopped, Starting) {
            debug!(state = %observed, "Local services not stopped, replicated action skipped");
            return Ok(());
        }

        let result = async {
            let uow = self.begin().await?;
            let applied = self.bring_up(&uow, action).await;
            uow.complete(applied).await
        }
        .await;

        match result {
            Ok(()) => {
                self.state.set(Started);
                if self.coordinator.restart().is_some() {
                    debug!("Recovery restart dispatched");
                }
                self.services_applied(action);
                Ok(())
            }
            Err(e) => {
                self.state.set(Stopped);
                Err(e)
            }
        }
    }

    async fn apply_remote_bring_down(&self, action: ServiceAction) -> TenancyResult<()> {
        if let Err(observed) = self.state.transition(Started, Stopping) {
            debug!(state = %observed, "Local services not started, replicated action skipped");
            return Ok(());
        }

        match self
            .scope
            .run(|_| self.switch.apply_in_new_unit(action))
            .await
        {
            Ok(()) => {
                match action {
                    ServiceAction::Pause => self.supervisor.on_pause(),
                    _ => self.supervisor.on_stop(),
                }
                self.state.set(Stopped);
                self.services_applied(action);
                Ok(())
            }
            Err(e) => {
                self.state.set(Started);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ClusterTaskHandler for TenantLifecycleController {
    /// Apply an action replicated by another node. Persisted status is left
    /// untouched; the originating node already committed it.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id, action = %task.action))]
    async fn execute_cluster_task(&self, task: ClusterTask) -> TenancyResult<()> {
        if task.tenant_id != self.tenant_id {
            return Err(TenancyError::Transport(format!(
                "task for tenant {} delivered to controller of tenant {}",
                task.tenant_id, self.tenant_id
            )));
        }

        if task.action.is_bring_up() {
            self.apply_remote_bring_up(task.action).await
        } else {
            self.apply_remote_bring_down(task.action).await
        }
    }
}
