//! Service state switch
//!
//! Applies one [`ServiceAction`] to every tenant-scoped subsystem. Services
//! are started and resumed in registration order and stopped and paused in
//! reverse order, so a service never runs without the ones registered before it.

use std::sync::Arc;

use tenancy_types::{ServiceAction, TenantId};
use tracing::{debug, info, instrument, warn};

use crate::error::TenancyResult;
use crate::ports::{TenantService, TransactionManager};
use crate::transaction::UnitOfWork;

/// Flips all tenant services between lifecycle states
pub struct ServiceStateSwitch {
    tenant_id: TenantId,
    services: Vec<Arc<dyn TenantService>>,
    transactions: Arc<dyn TransactionManager>,
}

impl ServiceStateSwitch {
    pub fn new(tenant_id: TenantId, transactions: Arc<dyn TransactionManager>) -> Self {
        Self {
            tenant_id,
            services: Vec::new(),
            transactions,
        }
    }

    /// Register a service; registration order is start order
    pub fn with_service(mut self, service: Arc<dyn TenantService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Arc<dyn TenantService>>) -> Self {
        self.services.extend(services);
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// Apply `action` as part of `uow`.
    ///
    /// Stops at the first failing service and returns its error unchanged;
    /// the caller rolls the unit of work back.
    #[instrument(skip(self, uow), fields(tenant_id = %self.tenant_id, action = %action, tx = %uow.id()))]
    pub async fn apply(&self, uow: &UnitOfWork, action: ServiceAction) -> TenancyResult<()> {
        let ordered: Vec<&Arc<dyn TenantService>> = if action.is_bring_up() {
            self.services.iter().collect()
        } else {
            self.services.iter().rev().collect()
        };

        for service in ordered {
            debug!(service = service.name(), "Applying action to service");
            let applied = match action {
                ServiceAction::Start => service.start(self.tenant_id).await,
                ServiceAction::Stop => service.stop(self.tenant_id).await,
                ServiceAction::Pause => service.pause(self.tenant_id).await,
                ServiceAction::Resume => service.resume(self.tenant_id).await,
            };
            if let Err(e) = applied {
                warn!(service = service.name(), error = %e, "Service failed, aborting switch");
                return Err(e);
            }
        }

        info!(services = self.services.len(), "Tenant services switched");
        Ok(())
    }

    /// Apply `action` in a unit of work of its own
    pub async fn apply_in_new_unit(&self, action: ServiceAction) -> TenancyResult<()> {
        let uow = UnitOfWork::begin(self.transactions.clone()).await?;
        let result = self.apply(&uow, action).await;
        uow.complete(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TenancyError};
    use crate::memory::{InMemoryTenantStore, RecordingTenantService, ServiceCallLog};
    use crate::ports::TenantStore;
    use tenancy_types::TenantStatus;

    fn switch_with(
        log: &ServiceCallLog,
        store: Arc<InMemoryTenantStore>,
        failing: Option<(&str, ServiceAction)>,
    ) -> ServiceStateSwitch {
        let tenant = TenantId::new(42);
        let mut switch = ServiceStateSwitch::new(tenant, store);
        for name in ["classloader", "scheduler", "connectors"] {
            let mut service = RecordingTenantService::new(name, log.clone());
            if let Some((failing_name, action)) = failing {
                if failing_name == name {
                    service = service.failing_on(action);
                }
            }
            switch = switch.with_service(Arc::new(service));
        }
        switch
    }

    #[tokio::test]
    async fn test_start_runs_in_registration_order() {
        let log = ServiceCallLog::default();
        let switch = switch_with(&log, Arc::new(InMemoryTenantStore::new()), None);

        switch.apply_in_new_unit(ServiceAction::Start).await.unwrap();

        assert_eq!(
            log.names_for(ServiceAction::Start),
            vec!["classloader", "scheduler", "connectors"]
        );
    }

    #[tokio::test]
    async fn test_stop_runs_in_reverse_order() {
        let log = ServiceCallLog::default();
        let switch = switch_with(&log, Arc::new(InMemoryTenantStore::new()), None);

        switch.apply_in_new_unit(ServiceAction::Stop).await.unwrap();

        assert_eq!(
            log.names_for(ServiceAction::Stop),
            vec!["connectors", "scheduler", "classloader"]
        );
    }

    #[tokio::test]
    async fn test_failure_propagates_unchanged_and_rolls_back() {
        let tenant = TenantId::new(42);
        let log = ServiceCallLog::default();
        let store = Arc::new(InMemoryTenantStore::with_tenant(tenant, TenantStatus::Activated));
        let switch = switch_with(&log, store.clone(), Some(("scheduler", ServiceAction::Pause)));

        let uow = UnitOfWork::begin(store.clone()).await.unwrap();
        store
            .set_status(uow.id(), tenant, TenantStatus::Paused)
            .await
            .unwrap();
        let result = switch.apply(&uow, ServiceAction::Pause).await;
        let err = uow.complete(result).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LocalApplyFailure);
        assert!(matches!(err, TenancyError::LocalApply { ref service, .. } if service == "scheduler"));
        // classloader comes after scheduler in pause order and is never reached
        assert_eq!(log.names_for(ServiceAction::Pause), vec!["connectors", "scheduler"]);
        assert_eq!(store.committed_status(tenant), Some(TenantStatus::Activated));
    }

    #[test]
    fn test_service_names() {
        let log = ServiceCallLog::default();
        let switch = switch_with(&log, Arc::new(InMemoryTenantStore::new()), None);
        assert_eq!(switch.service_names(), vec!["classloader", "scheduler", "connectors"]);
    }
}
