//! Tenancy node - in-process cluster running the tenant lifecycle runtime
//!
//! Boots the configured nodes, optionally runs one administrative action,
//! prints the resulting tenant states and shuts down.

use anyhow::Context;
use clap::Parser;
use tenancy_node::{AdminAction, LocalCluster, NodeConfig};
use tenancy_types::TenantId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tenancy node CLI
#[derive(Parser)]
#[command(name = "tenancyd")]
#[command(about = "Tenancy node - multi-tenant lifecycle runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TENANCY_CONFIG")]
    config: Option<String>,

    /// Number of nodes in the cluster
    #[arg(long, env = "TENANCY_NODES")]
    nodes: Option<usize>,

    /// Index of the node responsible for recovery
    #[arg(long, env = "TENANCY_RESPONSIBLE_NODE")]
    responsible_node: Option<usize>,

    /// Log level
    #[arg(long, env = "TENANCY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "TENANCY_LOG_JSON")]
    json: bool,

    /// Keep the cluster running until Ctrl+C or SIGTERM
    #[arg(long)]
    wait: bool,

    /// Administrative action to run after boot
    #[arg(value_enum)]
    action: Option<AdminAction>,

    /// Tenant the action applies to
    #[arg(short, long, default_value_t = 1)]
    tenant: u64,

    /// Node the action is issued from
    #[arg(long, default_value = "node-1")]
    node: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        NodeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(nodes) = cli.nodes {
        config.cluster.nodes = nodes;
    }
    if let Some(responsible) = cli.responsible_node {
        config.cluster.responsible_node = responsible;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;
    config.validate()?;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        nodes = config.cluster.nodes,
        tenants = config.tenants.len(),
        "Starting tenancy node"
    );

    let cluster = LocalCluster::build(&config)?;
    let failed = cluster.boot().await;
    if failed > 0 {
        tracing::warn!(failed, "Some tenants failed to start at boot");
    }

    let outcome = match cli.action {
        Some(action) => cluster
            .run(&cli.node, TenantId::new(cli.tenant), action)
            .await
            .with_context(|| format!("{:?} of tenant {} failed", action, cli.tenant)),
        None => Ok(()),
    };

    print_report(&cluster);

    if cli.wait && outcome.is_ok() {
        shutdown_signal().await?;
    }

    cluster.shutdown().await;
    outcome
}

fn print_report(cluster: &LocalCluster) {
    for report in cluster.report() {
        let status = report
            .status
            .map(|s| s.as_str())
            .unwrap_or("UNKNOWN");
        let nodes: Vec<String> = report
            .nodes
            .iter()
            .map(|(node, state)| format!("{}={:?}", node, state))
            .collect();
        println!("tenant {:>6}  {:<12} {}", report.tenant_id, status, nodes.join(" "));
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install signal handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.context("Failed to install Ctrl+C handler")?;
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
    Ok(())
}
