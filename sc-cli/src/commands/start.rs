//! Start command - run a cluster node until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use sc_cluster::{ClusterConfig, ClusterManager};

/// Flags for `space-cloud start`. Flags override the config file.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// Node config file (.yaml, .yml or .json)
    #[arg(short, long, env = "SC_CLUSTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node identity (defaults to the advertised Raft address)
    #[arg(long)]
    pub node_id: Option<String>,

    /// UDP address for gossip
    #[arg(long)]
    pub gossip_addr: Option<String>,

    /// Gossip address advertised to peers
    #[arg(long)]
    pub gossip_advertise_addr: Option<String>,

    /// Address for the Raft gRPC server
    #[arg(long)]
    pub raft_addr: Option<String>,

    /// Raft address advertised to peers
    #[arg(long)]
    pub raft_advertise_addr: Option<String>,

    /// Gossip addresses of existing members (comma-separated)
    #[arg(short, long, value_delimiter = ',', env = "SC_SEEDS")]
    pub seeds: Vec<String>,

    /// Directory for the log, snapshots and config mirror
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Size of the token space
    #[arg(long)]
    pub max_tokens: Option<u32>,
}

impl StartArgs {
    /// Load the config file, if any, and apply the flags on top.
    pub fn into_config(self) -> Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)
                .with_context(|| format!("Failed to load node config {}", path.display()))?,
            None => ClusterConfig::default(),
        };

        if let Some(id) = self.node_id {
            config.node_id = Some(id);
        }
        if let Some(addr) = self.gossip_addr {
            config.gossip_addr = addr;
        }
        if let Some(addr) = self.gossip_advertise_addr {
            config.gossip_advertise_addr = Some(addr);
        }
        if let Some(addr) = self.raft_addr {
            config.raft_addr = addr;
        }
        if let Some(addr) = self.raft_advertise_addr {
            config.raft_advertise_addr = Some(addr);
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(tokens) = self.max_tokens {
            config.max_tokens = tokens;
        }

        config
            .validate()
            .map_err(|reason| anyhow::anyhow!("Invalid node config: {}", reason))?;
        Ok(config)
    }
}

/// Run the start command.
pub async fn run(args: StartArgs) -> Result<()> {
    let config = args.into_config()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

    let manager = ClusterManager::start(
        config,
        Arc::new(|config| {
            tracing::info!(
                projects = config.projects.len(),
                routes = config.static_config.routes.len(),
                "Config changed"
            );
        }),
    )
    .await
    .context("Failed to start cluster node")?;

    let local = manager.local();
    println!("Node {} running", local.id);
    println!("  Gossip: {}", local.gossip_addr);
    println!("  Raft:   {}", local.raft_addr);
    if let Some(range) = manager.assigned_tokens() {
        println!("  Tokens: {}..={}", range.start, range.end);
    }
    println!("Press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down");
    if let Err(e) = manager.leave().await {
        tracing::warn!(error = %e, "Failed to announce leave");
    }
    manager.shutdown().await.context("Shutdown failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> StartArgs {
        StartArgs {
            config: None,
            node_id: None,
            gossip_addr: None,
            gossip_advertise_addr: None,
            raft_addr: None,
            raft_advertise_addr: None,
            seeds: Vec::new(),
            data_dir: None,
            max_tokens: None,
        }
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(
            &path,
            "raft_addr: 127.0.0.1:7001\ngossip_addr: 127.0.0.1:7000\nmax_tokens: 50\nseeds: [\"127.0.0.1:8000\"]\n",
        )
        .unwrap();

        let config = StartArgs {
            config: Some(path),
            raft_addr: Some("127.0.0.1:9001".to_string()),
            seeds: vec!["127.0.0.1:9100".to_string(), "127.0.0.1:9200".to_string()],
            ..args()
        }
        .into_config()
        .unwrap();

        assert_eq!(config.raft_addr, "127.0.0.1:9001");
        assert_eq!(config.gossip_addr, "127.0.0.1:7000");
        assert_eq!(config.max_tokens, 50);
        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.node_id(), "127.0.0.1:9001");
    }

    #[test]
    fn test_invalid_flags_rejected() {
        let err = StartArgs {
            max_tokens: Some(0),
            ..args()
        }
        .into_config()
        .unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }
}
