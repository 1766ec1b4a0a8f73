//! Tenancy Types - Core types for the tenant lifecycle runtime
//!
//! A tenant is an isolated unit of process execution hosted on every node of
//! a cluster. These types are shared between the lifecycle controller, the
//! cluster transport and the node binary.
//!
//! ## Key Concepts
//!
//! - **TenantStatus**: Durable, cluster-wide status (ACTIVATED, DEACTIVATED, PAUSED)
//! - **LocalLifecycleState**: Per-node view of whether tenant services run
//! - **ServiceAction**: Lifecycle action applied to tenant services
//! - **ClusterTask**: An action shipped to peer nodes
//! - **BroadcastOutcome**: Per-peer result of a fan-out
//! - **Events**: Observability stream of lifecycle activity

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod events;
pub mod ids;
pub mod status;

pub use action::{BroadcastOutcome, ClusterTask, ServiceAction};
pub use events::{EventSeverity, TenancyEvent, TenancyEventEnvelope};
pub use ids::{NodeId, SessionId, TenantId};
pub use status::{LocalLifecycleState, ParseError, TenantStatus};
