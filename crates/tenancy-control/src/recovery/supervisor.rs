//! Per-tenant, per-node restart latch.
//!
//! The supervisor is armed (`already_restarted == false`) when a tenant's
//! services stop or pause. The first [`RestartSupervisor::grant_restart`]
//! after arming wins; every later call is denied until the next reset.
//! It does not coordinate across nodes.

use std::sync::atomic::{AtomicBool, Ordering};

use tenancy_types::TenantId;
use tracing::debug;

/// Decides whether this node runs the recovery phases for a tenant
#[derive(Debug)]
pub struct RestartSupervisor {
    tenant_id: TenantId,
    already_restarted: AtomicBool,
}

impl RestartSupervisor {
    /// A freshly armed supervisor
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            already_restarted: AtomicBool::new(false),
        }
    }

    /// Whether pre-start preparation should run. Read-only.
    pub fn should_prepare(&self) -> bool {
        !self.already_restarted.load(Ordering::Acquire)
    }

    /// Consume the arming. Returns `true` to exactly one caller per cycle.
    pub fn grant_restart(&self) -> bool {
        let granted = self
            .already_restarted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        debug!(tenant_id = %self.tenant_id, granted, "Restart permission requested");
        granted
    }

    /// Re-arm after the tenant's services stopped
    pub fn on_stop(&self) {
        self.rearm("stop");
    }

    /// Re-arm after the tenant's services paused
    pub fn on_pause(&self) {
        self.rearm("pause");
    }

    pub fn already_restarted(&self) -> bool {
        self.already_restarted.load(Ordering::Acquire)
    }

    fn rearm(&self, cause: &'static str) {
        self.already_restarted.store(false, Ordering::Release);
        debug!(tenant_id = %self.tenant_id, cause, "Restart supervisor re-armed");
    }
}
