//! Telefleet Server
//!
//! Telemetry collection node. Splits the configured device fleet across the
//! cluster and takes over devices of failed members.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use telefleet_server::config::{DiscoveryBackend, FleetConfig};
use telefleet_server::discovery::{EtcdDiscovery, StaticMembership};
use telefleet_server::node::{run_node, shard_plan};
use telefleet_server::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use telefleet_server::version;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "telefleet-server")]
#[command(about = "Telemetry fleet node with consensus-free shard coordination")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run(ConfigArgs),
    /// Validate the configuration and print the per-node device split
    CheckConfig(ConfigArgs),
    /// Print build information
    Version,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// YAML configuration file
    #[arg(long, short, env = "TELEFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Address this node registers under
    #[arg(long)]
    node_address: Option<String>,

    /// Total expected cluster size
    #[arg(long)]
    number_of_nodes: Option<usize>,

    /// Healthy members required before the main shard is installed
    #[arg(long)]
    initializing_shards: Option<usize>,

    /// Healthy members required to take over instead of suspending
    #[arg(long)]
    minimum_shards: Option<usize>,

    /// Discovery backend (etcd or static)
    #[arg(long)]
    backend: Option<DiscoveryBackend>,

    /// Admin API listen address
    #[arg(long)]
    bind_addr: Option<String>,
}

impl ConfigArgs {
    /// Defaults, then the file, then environment, then these flags.
    fn load(&self) -> Result<FleetConfig> {
        let mut config = FleetConfig::load(self.config.as_deref())?;

        if let Some(address) = &self.node_address {
            config.cluster.node_address = address.clone();
        }
        if let Some(n) = self.number_of_nodes {
            config.cluster.number_of_nodes = n;
        }
        if let Some(n) = self.initializing_shards {
            config.cluster.initializing_shards = n;
        }
        if let Some(n) = self.minimum_shards {
            config.cluster.minimum_shards = n;
        }
        if let Some(backend) = self.backend {
            config.discovery.backend = backend;
        }
        if let Some(bind_addr) = &self.bind_addr {
            config.api.bind_addr = bind_addr.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::CheckConfig(args) => check_config(&args),
        Commands::Run(args) => run(&args).await,
    }
}

fn check_config(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?;
    let n = config.cluster.number_of_nodes;

    println!(
        "configuration OK: {} devices, {} nodes, backend {}",
        config.devices.len(),
        n,
        config.discovery.backend
    );
    for (id, share) in shard_plan(&config.devices, n).iter().enumerate() {
        let hosts: Vec<&str> = share.iter().map(|d| d.host.as_str()).collect();
        println!("node {id}: {} devices {:?}", share.len(), hosts);
    }
    Ok(())
}

async fn run(args: &ConfigArgs) -> Result<()> {
    init_tracing(TracingConfig::from_env())
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;

    let config = args.load()?;
    info!(
        version = %version::full_version(),
        node_address = %config.cluster.node_address,
        number_of_nodes = config.cluster.number_of_nodes,
        backend = %config.discovery.backend,
        devices = config.devices.len(),
        "Starting telefleet-server"
    );

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to initialize metrics, /metrics disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let signal = wait_for_shutdown_signal().await;
        info!(signal = signal, "Shutting down");
        let _ = shutdown_tx.send(true);
    });

    let result = match config.discovery.backend {
        DiscoveryBackend::Etcd => {
            let discovery = Arc::new(EtcdDiscovery::connect(&config).await?);
            run_node(config, discovery, metrics_state, shutdown_rx).await
        }
        DiscoveryBackend::Static => {
            let membership = StaticMembership::new(
                config.cluster.number_of_nodes,
                config.discovery.static_members.clone(),
            );
            let discovery = Arc::new(membership.discovery_for(config.cluster.node_address.clone()));
            run_node(config, discovery, metrics_state, shutdown_rx).await
        }
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "telefleet-server failed");
    }
    shutdown_tracing();
    result
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, returning which signal fired.
async fn wait_for_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, only Ctrl+C stops the node");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
