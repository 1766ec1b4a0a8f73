//! Configuration for tenancyd

use serde::{Deserialize, Serialize};
use tenancy_control::TenancyConfig;
use tenancy_types::{TenantId, TenantStatus};

use crate::error::{NodeError, NodeResult};

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// In-process cluster layout
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Lifecycle controller settings shared by every node
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Tenants known to the cluster at boot
    #[serde(default = "default_tenants")]
    pub tenants: Vec<TenantSeed>,

    /// Tenant services registered for every tenant, in start order
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            tenancy: TenancyConfig::default(),
            tenants: default_tenants(),
            services: default_services(),
            logging: LoggingConfig::default(),
        }
    }
}

/// In-process cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of nodes
    #[serde(default = "default_nodes")]
    pub nodes: usize,

    /// Index of the node responsible for recovery
    #[serde(default)]
    pub responsible_node: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            responsible_node: 0,
        }
    }
}

/// A tenant and its persisted status at boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSeed {
    pub id: u64,
    pub status: TenantStatus,
}

impl TenantSeed {
    pub fn tenant_id(&self) -> TenantId {
        TenantId::new(self.id)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_nodes() -> usize {
    3
}

fn default_tenants() -> Vec<TenantSeed> {
    vec![
        TenantSeed {
            id: 1,
            status: TenantStatus::Activated,
        },
        TenantSeed {
            id: 42,
            status: TenantStatus::Deactivated,
        },
    ]
}

fn default_services() -> Vec<String> {
    ["classloader", "scheduler-bindings", "connectors"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `TENANCY__`-prefixed environment variables
    pub fn load(path: Option<&str>) -> NodeResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TENANCY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NodeResult<()> {
        self.tenancy.validate()?;
        if self.cluster.nodes == 0 {
            return Err(NodeError::Config("cluster.nodes must be at least 1".into()));
        }
        if self.cluster.responsible_node >= self.cluster.nodes {
            return Err(NodeError::Config(format!(
                "cluster.responsible_node {} is outside a cluster of {} nodes",
                self.cluster.responsible_node, self.cluster.nodes
            )));
        }
        Ok(())
    }
}
