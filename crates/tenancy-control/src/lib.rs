//! # Tenancy Control
//!
//! Tenant lifecycle controller and distributed restart-recovery coordinator.
//!
//! ## Overview
//!
//! Every node of a cluster hosts every tenant. The [`TenantLifecycleController`]
//! of a tenant drives its local services through start, stop, pause and resume,
//! changes the durable tenant status on activate, deactivate, pause and resume,
//! and replicates those actions to the other nodes once the local change has
//! committed.
//!
//! Unfinished work left by a stop or a crash is recovered around the service
//! start: handlers prepare inside the starting transaction and resume on a
//! background task afterwards. Each node does this at most once per stop/start
//! cycle, and only a node responsible for the tenant does it at all.
//!
//! ## Key Components
//!
//! - [`TenantLifecycleController`]: operator-facing state machine of one tenant
//! - [`ServiceStateSwitch`]: applies a [`ServiceAction`] to the tenant services
//! - [`RestartSupervisor`] / [`RestartCoordinator`]: recovery fencing and dispatch
//! - [`ClusterBroadcaster`]: fan-out to peers, deferred until commit
//! - [`SessionScope`]: technical session around every operation
//! - [`UnitOfWork`]: transaction with explicit after-commit hooks
//! - [`NodeRuntime`]: the controllers of one node
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenancy_control::memory::{
//!     InMemoryJobScheduler, InMemorySessionStore, InMemoryTenantStore, ManualPlatformState,
//! };
//! use tenancy_control::{
//!     NodeRuntime, PeerFanOutTransport, StaticResponsibility, TenancyConfig, TenantPorts,
//! };
//! use tenancy_types::{NodeId, TenantId, TenantStatus};
//!
//! # async fn example() -> tenancy_control::TenancyResult<()> {
//! let store = Arc::new(InMemoryTenantStore::with_tenant(
//!     TenantId::new(42),
//!     TenantStatus::Deactivated,
//! ));
//! let ports = TenantPorts {
//!     store: store.clone(),
//!     transactions: store,
//!     sessions: Arc::new(InMemorySessionStore::new()),
//!     scheduler: Arc::new(InMemoryJobScheduler::new()),
//!     platform: Arc::new(ManualPlatformState::new(true)),
//!     transport: Arc::new(PeerFanOutTransport::new(NodeId::from("node-1"))),
//!     responsibility: Arc::new(StaticResponsibility::responsible()),
//! };
//!
//! let node = NodeRuntime::new(NodeId::from("node-1"), TenancyConfig::default(), ports);
//! let tenant = node.register_tenant(node.new_controller(TenantId::new(42)))?;
//! tenant.activate().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod memory;
pub mod node;
pub mod ports;
pub mod recovery;
pub mod services;
pub mod session;
pub mod state;
pub mod transaction;

// Re-exports
pub use cluster::{ClusterBroadcaster, InProcessPeer, PeerFanOutTransport, DEFAULT_BROADCAST_TIMEOUT};
pub use config::TenancyConfig;
pub use controller::{TenantLifecycleController, TenantPorts};
pub use error::{ErrorKind, TenancyError, TenancyResult};
pub use events::EventAggregator;
pub use node::NodeRuntime;
pub use ports::{
    ClusterTaskHandler, ClusterTransport, JobScheduler, PeerClient, PlatformState,
    RecoveryHandler, RecoveryResponsibility, SessionStore, TenantService, TenantStore,
    TransactionManager,
};
pub use recovery::{RestartCoordinator, RestartSupervisor, StaticResponsibility};
pub use services::ServiceStateSwitch;
pub use session::{
    current_session, with_current_session, CurrentSession, Principal, SessionHandle, SessionScope,
};
pub use state::LifecycleCell;
pub use tenancy_types::ServiceAction;
pub use transaction::{CommitHooks, TransactionId, UnitOfWork};
