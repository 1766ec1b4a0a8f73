//! Tenancy node library
//!
//! Runs several tenancy nodes in one process so the lifecycle runtime can be
//! exercised end to end:
//! - configuration loading
//! - cluster wiring over in-process peers
//! - logging services and recovery handlers

pub mod cluster;
pub mod config;
pub mod error;
pub mod services;

pub use cluster::{AdminAction, LocalCluster, TenantReport};
pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
