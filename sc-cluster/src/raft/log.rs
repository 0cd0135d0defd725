//! `ConsensusLog`: the replicated command log of one node.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use openraft::error::RaftError;
use openraft::metrics::WaitError;
use openraft::{BasicNode, Raft, ServerState, SnapshotPolicy};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;

use super::log_store::LogStore;
use crate::command::{Command, CommandResponse};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult, InitializeError};
use crate::network::{ChannelPool, NetworkClient, RaftServer};
use crate::node::ClusterNode;
use crate::proto::ExecuteRequest;
use crate::proto::cluster_service_client::ClusterServiceClient;
use crate::proto::cluster_service_server::ClusterServiceServer;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::service::ClusterServiceImpl;
use crate::state::ConfigFsm;
use crate::types::{
    ClusterMetrics, ClusterRaft, LeaderInfo, RaftNodeId, extract_forward_to_leader,
    is_forward_to_leader,
};

/// Durable, quorum-replicated log of [`Command`]s.
///
/// Owns the Raft instance, its on-disk log and the gRPC server peers talk
/// to. Committed entries are applied to the shared [`ConfigFsm`].
pub struct ConsensusLog {
    local: ClusterNode,
    raft: Arc<ClusterRaft>,
    fsm: Arc<ConfigFsm>,
    pool: Arc<ChannelPool>,
    propose_timeout: Duration,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ConsensusLog {
    /// Open the log, start Raft and serve RPC on `config.raft_addr`.
    pub async fn start(
        config: &ClusterConfig,
        local: ClusterNode,
        fsm: Arc<ConfigFsm>,
    ) -> ClusterResult<Self> {
        let log_store = LogStore::open(config.raft_dir())?;
        let pool = Arc::new(ChannelPool::new());

        let raft_config = openraft::Config {
            cluster_name: "space-cloud".to_string(),
            election_timeout_min: config.raft.election_timeout_ms.0,
            election_timeout_max: config.raft.election_timeout_ms.1,
            heartbeat_interval: config.raft.heartbeat_interval_ms,
            max_payload_entries: config.raft.max_entries_per_append,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(config.snapshot.snapshot_threshold),
            max_in_snapshot_log_to_keep: config.snapshot.max_logs_after_snapshot,
            ..Default::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        );

        let raft = Raft::new(
            local.raft_id(),
            raft_config,
            NetworkClient::new(Arc::clone(&pool)),
            log_store,
            Arc::clone(&fsm),
        )
        .await
        .map_err(|e| ClusterError::Storage(format!("Failed to create Raft: {}", e)))?;
        let raft = Arc::new(raft);

        let addr = config.raft_bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let raft_service = RaftServiceServer::new(RaftServer::new(Arc::clone(&raft)));
        let cluster_service =
            ClusterServiceServer::new(ClusterServiceImpl::new(local.clone(), Arc::clone(&raft)));
        tokio::spawn(async move {
            let served = Server::builder()
                .add_service(raft_service)
                .add_service(cluster_service)
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Raft RPC server stopped");
            }
        });

        tracing::info!(
            node = %local.id,
            raft_id = local.raft_id(),
            %addr,
            "Consensus log started"
        );

        Ok(Self {
            local,
            raft,
            fsm,
            pool,
            propose_timeout: config.propose_timeout,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// The local node.
    pub fn local(&self) -> &ClusterNode {
        &self.local
    }

    /// Raft ID of the local node.
    pub fn raft_id(&self) -> RaftNodeId {
        self.local.raft_id()
    }

    /// The state machine this log applies to.
    pub fn fsm(&self) -> &Arc<ConfigFsm> {
        &self.fsm
    }

    /// Initialize a brand-new group with `voters`.
    ///
    /// Returns `false` when the log already holds state, which means the
    /// group was bootstrapped before (here or by a peer).
    pub async fn bootstrap(&self, voters: &[ClusterNode]) -> ClusterResult<bool> {
        let members: BTreeMap<RaftNodeId, BasicNode> = voters
            .iter()
            .map(|node| {
                (
                    node.raft_id(),
                    BasicNode {
                        addr: node.raft_addr.clone(),
                    },
                )
            })
            .collect();
        let count = members.len();

        match self.raft.initialize(members).await {
            Ok(()) => {
                tracing::info!(voters = count, "Bootstrapped consensus group");
                Ok(true)
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                tracing::debug!("Consensus group already initialized");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append `command` and wait until the local state machine applied it.
    ///
    /// Followers forward the command to the leader. Fails with
    /// [`ClusterError::NotLeader`] when no leader is known and with
    /// [`ClusterError::Timeout`] when the deadline passes first.
    pub async fn propose(&self, command: Command) -> ClusterResult<CommandResponse> {
        let started = Instant::now();
        let written = tokio::time::timeout(self.propose_timeout, self.raft.client_write(command.clone()))
            .await
            .map_err(|_| ClusterError::timeout("propose", self.propose_timeout))?;

        let error = match written {
            Ok(written) => {
                tracing::debug!(index = written.log_id.index, "Proposal committed");
                return Ok(written.data);
            }
            Err(e) => e,
        };

        match extract_forward_to_leader(&error) {
            Some(leader) if leader.leader_id != self.raft_id() && !leader.leader_addr.is_empty() => {
                let remaining = self.propose_timeout.saturating_sub(started.elapsed());
                let response = tokio::time::timeout(remaining, self.forward(&leader, &command))
                    .await
                    .map_err(|_| ClusterError::timeout("propose", self.propose_timeout))??;
                let remaining = self.propose_timeout.saturating_sub(started.elapsed());
                self.wait_applied(response.index, remaining).await?;
                Ok(response)
            }
            Some(leader) => Err(ClusterError::NotLeader {
                leader: Some(leader.leader_id),
            }),
            None if is_forward_to_leader(&error) => Err(ClusterError::NotLeader { leader: None }),
            None => Err(error.into()),
        }
    }

    async fn forward(&self, leader: &LeaderInfo, command: &Command) -> ClusterResult<CommandResponse> {
        tracing::debug!(
            leader = leader.leader_id,
            addr = %leader.leader_addr,
            command = command.name(),
            "Forwarding proposal to leader"
        );
        let channel = self.pool.get(&leader.leader_addr).await?;
        let mut client = ClusterServiceClient::new(channel);
        let request = ExecuteRequest {
            command: serde_json::to_vec(command)?,
        };
        let response = client
            .execute(request)
            .await
            .map_err(|status| {
                self.pool.evict(&leader.leader_addr);
                ClusterError::from(status)
            })?
            .into_inner();

        if response.success {
            Ok(CommandResponse {
                index: response.index,
                changed: response.changed,
            })
        } else if response.leader_id != 0 {
            Err(ClusterError::NotLeader {
                leader: Some(response.leader_id),
            })
        } else {
            Err(ClusterError::Raft(response.error))
        }
    }

    /// Wait until the local state machine applied `index`.
    pub async fn wait_applied(&self, index: u64, timeout: Duration) -> ClusterResult<()> {
        self.raft
            .wait(Some(timeout))
            .applied_index_at_least(Some(index), "apply proposal")
            .await
            .map_err(|e| match e {
                WaitError::Timeout(..) => ClusterError::timeout("apply", timeout),
                other => ClusterError::Raft(other.to_string()),
            })?;
        Ok(())
    }

    /// Make `node` a voter: add it as a learner, let it catch up, promote it.
    pub async fn add_voter(&self, node: &ClusterNode) -> ClusterResult<()> {
        let raft_id = node.raft_id();
        let learner = BasicNode {
            addr: node.raft_addr.clone(),
        };
        tokio::time::timeout(self.propose_timeout, self.raft.add_learner(raft_id, learner, true))
            .await
            .map_err(|_| ClusterError::timeout("add learner", self.propose_timeout))??;

        let mut voters = self.voters();
        voters.insert(raft_id);
        tokio::time::timeout(self.propose_timeout, self.raft.change_membership(voters, false))
            .await
            .map_err(|_| ClusterError::timeout("change membership", self.propose_timeout))??;

        tracing::info!(node = %node.id, raft_id, "Added voter");
        Ok(())
    }

    /// Remove `raft_id` from the voter set.
    pub async fn remove_voter(&self, raft_id: RaftNodeId) -> ClusterResult<()> {
        let mut voters = self.voters();
        if !voters.remove(&raft_id) {
            return Err(ClusterError::NodeNotFound(raft_id));
        }
        if voters.is_empty() {
            return Err(ClusterError::Config(
                "cannot remove the last voter".to_string(),
            ));
        }
        tokio::time::timeout(self.propose_timeout, self.raft.change_membership(voters, false))
            .await
            .map_err(|_| ClusterError::timeout("change membership", self.propose_timeout))??;

        tracing::info!(raft_id, "Removed voter");
        Ok(())
    }

    /// Whether this node currently leads the group.
    pub fn is_leader(&self) -> bool {
        let metrics = self.raft.metrics();
        let metrics = metrics.borrow();
        metrics.state == ServerState::Leader && metrics.current_leader == Some(self.raft_id())
    }

    /// The leader this node knows of.
    pub fn leader(&self) -> Option<RaftNodeId> {
        self.raft.metrics().borrow().current_leader
    }

    /// Current voter set.
    pub fn voters(&self) -> BTreeSet<RaftNodeId> {
        self.raft
            .metrics()
            .borrow()
            .membership_config
            .membership()
            .voter_ids()
            .collect()
    }

    /// Whether the group has a membership, i.e. was bootstrapped.
    pub fn is_initialized(&self) -> bool {
        let metrics = self.raft.metrics();
        let metrics = metrics.borrow();
        metrics.membership_config.membership().voter_ids().next().is_some()
    }

    /// Raft metrics snapshot.
    pub fn metrics(&self) -> ClusterMetrics {
        self.raft.metrics().borrow().clone()
    }

    /// Build and persist a snapshot now.
    pub async fn trigger_snapshot(&self) -> ClusterResult<()> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| ClusterError::Raft(e.to_string()))
    }

    /// Stop serving RPC and shut Raft down.
    pub async fn shutdown(&self) -> ClusterResult<()> {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        self.raft
            .shutdown()
            .await
            .map_err(|e| ClusterError::Raft(format!("shutdown failed: {}", e)))?;
        tracing::info!(node = %self.local.id, "Consensus log stopped");
        Ok(())
    }
}

impl Drop for ConsensusLog {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}
