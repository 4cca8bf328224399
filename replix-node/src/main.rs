use std::{collections::BTreeMap, sync::Arc, time::Duration};

use clap::Parser;
use replix_common::{config::NodeConfig, NodeId};
use replix_node::{cli::Args, Node, NodeBuilder};
use replix_p2p::{ActivityState, InMemoryNetwork};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Arguments and configuration
    let args = Args::parse();
    let configs = args
        .configs
        .iter()
        .map(NodeConfig::load_from_file)
        .collect::<Result<Vec<_>, _>>()?;

    let log_name = match configs.as_slice() {
        [single] => single.node_id.to_string(),
        _ => "cluster".to_string(),
    };

    // 2. Logging: audit file for our crates, env-filtered stdout
    std::fs::create_dir_all(&args.log_dir)?;
    let file_appender =
        tracing_appender::rolling::never(&args.log_dir, format!("replix-{}.log", log_name));
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().starts_with("replix_")
        }));

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,replix_node=debug".into()),
    );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    info!("--- STARTING REPLIX ({} nodes) ---", configs.len());

    // 3. Build every node on one in-memory network
    let network = InMemoryNetwork::new();
    let mut nodes: BTreeMap<NodeId, Arc<Node>> = BTreeMap::new();

    for config in configs {
        let node_id = config.node_id.clone();
        let mut builder = NodeBuilder::new(config).with_transport(Arc::new(network.clone()));
        if args.inactive.iter().any(|id| id == node_id.as_str()) {
            builder = builder.with_initial_state(ActivityState::Inactive);
        }

        let node = match builder.build() {
            Ok(node) => node,
            Err(e) => {
                error!("Failed to start node {}: {}", node_id, e);
                return Err(e.into());
            }
        };
        network.register(node_id.clone(), node.endpoint());
        nodes.insert(node_id, node);
    }

    // 4. Scripted transfers
    for transfer in &args.transfers {
        let Some(client) = nodes.get(&NodeId::from(transfer.client.as_str())) else {
            warn!("No node named {} for transfer, skipping", transfer.client);
            continue;
        };
        match client.submit_transfer(&transfer.receiver, transfer.amount).await {
            Ok(reply) => info!(
                "{} -> {} ({}): {}",
                transfer.client, transfer.receiver, transfer.amount, reply.result
            ),
            Err(e) => error!(
                "{} -> {} ({}) failed: {}",
                transfer.client, transfer.receiver, transfer.amount, e
            ),
        }
    }

    // 5. Run until interrupted
    info!("Cluster running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    let grace = Duration::from_millis(args.shutdown_grace_ms);
    for node in nodes.values() {
        if !node.shutdown(grace).await {
            warn!("Node {} aborted work during shutdown", node.node_id());
        }
    }

    Ok(())
}
