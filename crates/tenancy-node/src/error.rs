//! Error types for tenancyd

use tenancy_control::TenancyError;
use thiserror::Error;

/// Node error type
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle operation failed
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Command refers to a node or tenant the cluster does not have
    #[error("Unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },
}

impl From<config::ConfigError> for NodeError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for node operations
pub type NodeResult<T> = std::result::Result<T, NodeError>;
