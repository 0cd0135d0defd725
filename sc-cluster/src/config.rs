//! Cluster configuration.

use crate::error::{ClusterError, ClusterResult};
use crate::node::ClusterNode;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Node identity. Defaults to the advertised Raft address.
    pub node_id: Option<String>,

    /// UDP address gossip binds to (e.g., "0.0.0.0:4234").
    pub gossip_addr: String,

    /// Gossip address advertised to peers. Falls back to `gossip_addr`.
    pub gossip_advertise_addr: Option<String>,

    /// Address the Raft gRPC server listens on (e.g., "0.0.0.0:4235").
    pub raft_addr: String,

    /// Raft address advertised to peers. Falls back to `raft_addr`.
    pub raft_advertise_addr: Option<String>,

    /// Gossip addresses of existing members to join through.
    pub seeds: Vec<String>,

    /// Directory for the Raft log (`raft/`) and snapshots (`snapshots/`).
    pub data_dir: PathBuf,

    /// Human-readable mirror of the config document.
    /// Defaults to `<data_dir>/config.yaml`.
    pub config_file: Option<PathBuf>,

    /// Size of the token space partitioned across members.
    pub max_tokens: u32,

    /// Raft timing configuration.
    pub raft: RaftConfig,

    /// Snapshot configuration.
    pub snapshot: SnapshotConfig,

    /// Gossip failure-detector tuning.
    pub swim: SwimConfig,

    /// Voter reconciliation timing.
    pub reconcile: ReconcileConfig,

    /// Startup timeouts.
    pub bootstrap: BootstrapConfig,

    /// How long a proposal may take to be applied locally.
    #[serde(with = "humantime_serde")]
    pub propose_timeout: Duration,
}

/// Raft timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Election timeout range (min, max) in milliseconds.
    /// Should be >> heartbeat_interval to avoid spurious elections.
    pub election_timeout_ms: (u64, u64),

    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: u64,
}

/// Snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Create snapshot after this many log entries.
    pub snapshot_threshold: u64,

    /// Number of log entries kept after a snapshot for lagging followers.
    pub max_logs_after_snapshot: u64,

    /// Snapshot files retained on disk.
    pub retained_snapshots: usize,
}

/// SWIM gossip tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwimConfig {
    /// Interval between direct probes.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Timeout before a probe is treated as failed.
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Time a suspect has to refute before it is declared dead.
    #[serde(with = "humantime_serde")]
    pub suspicion_timeout: Duration,
    /// Number of indirect probes to request.
    pub indirect_probes: usize,
    /// Maximum rumors piggybacked per message.
    pub gossip_batch: usize,
    /// How long dead and departed members stay in the member table.
    #[serde(with = "humantime_serde")]
    pub dead_retention: Duration,
}

/// Voter reconciliation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Quiet period after the last membership change before reconciling.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Periodic pass interval, retries failed steps.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Startup timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// How long to wait for any seed to answer.
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
    /// How long to collect answers to the bootstrap-status query.
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            gossip_addr: "127.0.0.1:4234".to_string(),
            gossip_advertise_addr: None,
            raft_addr: "127.0.0.1:4235".to_string(),
            raft_advertise_addr: None,
            seeds: Vec::new(),
            data_dir: PathBuf::from("./space-cloud-data"),
            config_file: None,
            max_tokens: 100,
            raft: RaftConfig::default(),
            snapshot: SnapshotConfig::default(),
            swim: SwimConfig::default(),
            reconcile: ReconcileConfig::default(),
            bootstrap: BootstrapConfig::default(),
            propose_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: (150, 300),
            heartbeat_interval_ms: 50,
            max_entries_per_append: 100,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_threshold: 1_000,
            max_logs_after_snapshot: 500,
            retained_snapshots: 2,
        }
    }
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            ack_timeout: Duration::from_millis(600),
            suspicion_timeout: Duration::from_secs(2),
            indirect_probes: 3,
            gossip_batch: 6,
            dead_retention: Duration::from_secs(300),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(20),
            interval: Duration::from_secs(60),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(3),
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Load from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> ClusterResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_slice(&data)?,
            Some("yaml") | Some("yml") => serde_yaml::from_slice(&data)
                .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(ClusterError::Config(format!(
                    "{}: expected a .yaml, .yml or .json file",
                    path.display()
                )));
            }
        };
        Ok(config)
    }

    /// Raft address advertised to peers.
    pub fn raft_advertise_addr(&self) -> &str {
        self.raft_advertise_addr.as_deref().unwrap_or(&self.raft_addr)
    }

    /// Gossip address advertised to peers.
    pub fn gossip_advertise_addr(&self) -> &str {
        self.gossip_advertise_addr
            .as_deref()
            .unwrap_or(&self.gossip_addr)
    }

    /// This node's identity.
    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| self.raft_advertise_addr().to_string())
    }

    /// Describe the local node as peers will see it.
    pub fn local_node(&self) -> ClusterResult<ClusterNode> {
        Ok(ClusterNode::new(
            self.node_id(),
            resolve(self.gossip_advertise_addr())?,
            self.raft_advertise_addr(),
        ))
    }

    /// Bind address for the gossip socket.
    pub fn gossip_bind_addr(&self) -> ClusterResult<SocketAddr> {
        resolve(&self.gossip_addr)
    }

    /// Listen address for the Raft gRPC server.
    pub fn raft_bind_addr(&self) -> ClusterResult<SocketAddr> {
        resolve(&self.raft_addr)
    }

    /// Resolved seed addresses.
    pub fn seed_addrs(&self) -> ClusterResult<Vec<SocketAddr>> {
        self.seeds.iter().map(|seed| resolve(seed)).collect()
    }

    /// Path of the human-readable config mirror.
    pub fn config_file(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("config.yaml"))
    }

    /// Directory of the Raft log.
    pub fn raft_dir(&self) -> PathBuf {
        self.data_dir.join("raft")
    }

    /// Directory of persisted snapshots.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.gossip_addr.is_empty() {
            return Err("gossip_addr is required".to_string());
        }

        if self.raft_addr.is_empty() {
            return Err("raft_addr is required".to_string());
        }

        if self.node_id.as_deref() == Some("") {
            return Err("node_id must not be empty".to_string());
        }

        if self.max_tokens == 0 {
            return Err("max_tokens must be > 0".to_string());
        }

        // Heartbeat should be much less than election timeout
        let (min_election, max_election) = self.raft.election_timeout_ms;
        if min_election > max_election {
            return Err(format!(
                "election_timeout_ms min ({}) exceeds max ({})",
                min_election, max_election
            ));
        }
        if self.raft.heartbeat_interval_ms >= min_election / 2 {
            return Err(format!(
                "heartbeat_interval_ms ({}) should be << election_timeout_ms ({})",
                self.raft.heartbeat_interval_ms, min_election
            ));
        }

        if self.swim.ack_timeout >= self.swim.ping_interval {
            return Err("swim.ack_timeout must be shorter than swim.ping_interval".to_string());
        }

        if self.swim.dead_retention < self.swim.suspicion_timeout {
            return Err("swim.dead_retention must not be shorter than swim.suspicion_timeout".to_string());
        }

        if self.snapshot.retained_snapshots == 0 {
            return Err("snapshot.retained_snapshots must be > 0".to_string());
        }

        Ok(())
    }
}

fn resolve(addr: &str) -> ClusterResult<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| ClusterError::Config(format!("invalid address {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| ClusterError::Config(format!("address {} did not resolve", addr)))
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the node ID.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = Some(id.into());
        self
    }

    /// Set the gossip bind address.
    pub fn gossip_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.gossip_addr = addr.into();
        self
    }

    /// Set the Raft listen address.
    pub fn raft_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.raft_addr = addr.into();
        self
    }

    /// Set the advertised Raft address.
    pub fn raft_advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.raft_advertise_addr = Some(addr.into());
        self
    }

    /// Add a seed gossip address.
    pub fn seed(mut self, addr: impl Into<String>) -> Self {
        self.config.seeds.push(addr.into());
        self
    }

    /// Set all seeds at once.
    pub fn seeds(mut self, seeds: impl IntoIterator<Item = String>) -> Self {
        self.config.seeds = seeds.into_iter().collect();
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the config mirror path.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_file = Some(path.into());
        self
    }

    /// Set the token space size.
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.config.max_tokens = tokens;
        self
    }

    /// Set election timeout range in milliseconds.
    pub fn election_timeout_ms(mut self, min: u64, max: u64) -> Self {
        self.config.raft.election_timeout_ms = (min, max);
        self
    }

    /// Set heartbeat interval in milliseconds.
    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.config.raft.heartbeat_interval_ms = ms;
        self
    }

    /// Set snapshot threshold.
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot.snapshot_threshold = entries;
        self
    }

    /// Set gossip tuning.
    pub fn swim(mut self, swim: SwimConfig) -> Self {
        self.config.swim = swim;
        self
    }

    /// Set reconciliation debounce delay and retry interval.
    pub fn reconcile(mut self, delay: Duration, interval: Duration) -> Self {
        self.config.reconcile = ReconcileConfig { delay, interval };
        self
    }

    /// Set join and bootstrap-query timeouts.
    pub fn bootstrap(mut self, join_timeout: Duration, query_timeout: Duration) -> Self {
        self.config.bootstrap = BootstrapConfig {
            join_timeout,
            query_timeout,
        };
        self
    }

    /// Set the propose timeout.
    pub fn propose_timeout(mut self, timeout: Duration) -> Self {
        self.config.propose_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClusterConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
