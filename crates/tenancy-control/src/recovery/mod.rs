//! Restart recovery of unfinished work.
//!
//! - [`RestartSupervisor`]: per-node latch, each recovery phase at most once per arming
//! - [`RestartCoordinator`]: runs recovery handlers before and after services start
//! - [`StaticResponsibility`]: fixed answer to "does this node recover the tenant"

pub mod coordinator;
pub mod supervisor;

pub use coordinator::RestartCoordinator;
pub use supervisor::RestartSupervisor;

use tenancy_types::TenantId;

use crate::ports::RecoveryResponsibility;

/// Responsibility decided once, from configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticResponsibility {
    responsible: bool,
}

impl StaticResponsibility {
    pub fn new(responsible: bool) -> Self {
        Self { responsible }
    }

    pub fn responsible() -> Self {
        Self::new(true)
    }
}

impl RecoveryResponsibility for StaticResponsibility {
    fn is_responsible_for_recovery(&self, _tenant_id: TenantId) -> bool {
        self.responsible
    }
}
