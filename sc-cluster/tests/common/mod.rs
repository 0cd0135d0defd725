//! Common test utilities for sc-cluster tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use sc_cluster::config::SwimConfig;
use sc_cluster::{ChangeCallback, ClusterConfig, ClusterManager, RaftNodeId};
use tempfile::TempDir;

/// Atomic counter for allocating unique ports.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(17000);

/// Get a unique port for testing.
pub fn get_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Callback that ignores changes.
pub fn noop_callback() -> ChangeCallback {
    Arc::new(|_| {})
}

/// Config with timings tightened for tests.
pub fn test_config(data_dir: impl Into<PathBuf>, seeds: Vec<String>) -> ClusterConfig {
    let gossip = format!("127.0.0.1:{}", get_test_port());
    let raft = format!("127.0.0.1:{}", get_test_port());
    ClusterConfig::builder()
        .gossip_addr(gossip)
        .raft_addr(raft)
        .seeds(seeds)
        .data_dir(data_dir)
        .election_timeout_ms(300, 600)
        .heartbeat_interval_ms(50)
        .swim(SwimConfig {
            ping_interval: Duration::from_millis(200),
            ack_timeout: Duration::from_millis(100),
            suspicion_timeout: Duration::from_millis(1000),
            indirect_probes: 2,
            gossip_batch: 6,
            dead_retention: Duration::from_secs(30),
        })
        .reconcile(Duration::from_millis(300), Duration::from_secs(1))
        .bootstrap(Duration::from_secs(5), Duration::from_millis(500))
        .propose_timeout(Duration::from_secs(5))
        .build()
        .expect("Invalid config")
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Test context that holds temp directories and nodes.
#[allow(dead_code)]
pub struct TestCluster {
    /// Temp directories for each node (kept alive for the test duration).
    _temp_dirs: Vec<TempDir>,
    /// Running nodes; `None` once killed.
    pub nodes: Vec<Option<ClusterManager>>,
    /// Per-node configs.
    pub configs: Vec<ClusterConfig>,
}

#[allow(dead_code)]
impl TestCluster {
    /// Start `node_count` nodes concurrently, each seeded with all the others.
    pub async fn start(node_count: usize) -> Self {
        Self::start_with(node_count, |_| {}).await
    }

    /// Like [`TestCluster::start`], adjusting every config before start.
    pub async fn start_with<F>(node_count: usize, adjust: F) -> Self
    where
        F: Fn(&mut ClusterConfig),
    {
        let mut temp_dirs = Vec::with_capacity(node_count);
        let mut configs = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let mut config = test_config(temp_dir.path(), Vec::new());
            adjust(&mut config);
            configs.push(config);
            temp_dirs.push(temp_dir);
        }

        let gossip: Vec<String> = configs.iter().map(|c| c.gossip_addr.clone()).collect();
        for (i, config) in configs.iter_mut().enumerate() {
            config.seeds = gossip
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, addr)| addr.clone())
                .collect();
        }

        let handles: Vec<_> = configs
            .iter()
            .cloned()
            .map(|config| tokio::spawn(ClusterManager::start(config, noop_callback())))
            .collect();

        let mut nodes = Vec::with_capacity(node_count);
        for handle in handles {
            let node = handle
                .await
                .expect("Start task panicked")
                .expect("Failed to start node");
            nodes.push(Some(node));
        }

        Self {
            _temp_dirs: temp_dirs,
            nodes,
            configs,
        }
    }

    /// Start one more node seeded with every running node.
    ///
    /// The newcomer inherits the reconcile settings of the first node.
    pub async fn add_node(&mut self) -> usize {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let seeds = self
            .nodes
            .iter()
            .zip(&self.configs)
            .filter(|(node, _)| node.is_some())
            .map(|(_, config)| config.gossip_addr.clone())
            .collect();
        let mut config = test_config(temp_dir.path(), seeds);
        config.reconcile = self.configs[0].reconcile.clone();

        let node = ClusterManager::start(config.clone(), noop_callback())
            .await
            .expect("Failed to start joining node");
        self._temp_dirs.push(temp_dir);
        self.configs.push(config);
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    /// Nodes that are still running.
    pub fn alive(&self) -> impl Iterator<Item = &ClusterManager> {
        self.nodes.iter().flatten()
    }

    /// Index of the node currently leading, if any.
    pub fn leader_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.as_ref().is_some_and(ClusterManager::is_leader))
    }

    /// Wait for a leader to be elected.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(leader) = self.leader_index() {
                return Some(leader);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    /// Raft voter sets as seen by every running node.
    pub fn voter_sets(&self) -> Vec<Vec<RaftNodeId>> {
        self.alive()
            .filter_map(|node| node.consensus())
            .map(|log| log.voters().into_iter().collect())
            .collect()
    }

    /// Stop node `index` without announcing a leave.
    pub async fn kill(&mut self, index: usize) {
        if let Some(node) = self.nodes[index].take() {
            let _ = node.shutdown().await;
        }
    }

    /// Shutdown all nodes.
    pub async fn shutdown(&mut self) {
        for index in 0..self.nodes.len() {
            self.kill(index).await;
        }
    }
}
