//! Blobhouse node binary.
//!
//! Runs a single node: loads the JSON config, builds static membership from
//! it, wires the in-process transport, and runs until interrupted. The
//! production RPC transport is deployment-specific and plugs in through the
//! same `ClusterTransport` seam the in-memory one implements.

use anyhow::Context;
use blobhouse_cluster::{ClusterMembership, InMemoryTransport, Node, StaticMembership};
use blobhouse_server::{BlobServer, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blobhouse", about = "Distributed blob store node")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data root from the config.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Override the node id from the config.
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(data_root) = args.data_root {
        config.storage.data_root = data_root;
    }
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }

    let membership: Arc<dyn ClusterMembership> = Arc::new(build_membership(&config));
    let transport = Arc::new(InMemoryTransport::new());

    let server = BlobServer::open(config, membership, transport.clone())
        .await
        .context("assembling server")?;
    transport
        .register(server.node_id().to_string(), server.handler())
        .await;

    server.start().await.context("starting server")?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    server.stop().await;

    Ok(())
}

fn build_membership(config: &ServerConfig) -> StaticMembership {
    if config.members.is_empty() {
        let node = if config.is_master {
            Node::master(config.node_id.clone())
        } else {
            Node::slave(config.node_id.clone())
        };
        return StaticMembership::new(node.clone(), vec![node]);
    }

    let members: Vec<Node> = config
        .members
        .iter()
        .map(|m| {
            if m.master {
                Node::master(m.id.clone())
            } else {
                Node::slave(m.id.clone())
            }
        })
        .collect();

    let self_node = members
        .iter()
        .find(|n| n.id == config.node_id)
        .cloned()
        .unwrap_or_else(|| Node::slave(config.node_id.clone()));

    StaticMembership::new(self_node, members)
}
