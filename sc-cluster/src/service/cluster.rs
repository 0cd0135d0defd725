//! `ClusterService`: command execution on the leader and status reports.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::command::Command;
use crate::node::ClusterNode;
use crate::proto::cluster_service_server::ClusterService;
use crate::proto::{ExecuteRequest, ExecuteResponse, StatusRequest, StatusResponse, VoterInfo};
use crate::types::{ClusterRaft, extract_forward_to_leader};

/// Serves commands forwarded by followers and status queries.
pub struct ClusterServiceImpl {
    local: ClusterNode,
    raft: Arc<ClusterRaft>,
}

impl ClusterServiceImpl {
    /// Create the service for `local`.
    pub fn new(local: ClusterNode, raft: Arc<ClusterRaft>) -> Self {
        Self { local, raft }
    }
}

fn server_state_name(state: openraft::ServerState) -> &'static str {
    match state {
        openraft::ServerState::Leader => "leader",
        openraft::ServerState::Follower => "follower",
        openraft::ServerState::Candidate => "candidate",
        openraft::ServerState::Learner => "learner",
        openraft::ServerState::Shutdown => "shutdown",
    }
}

#[tonic::async_trait]
impl ClusterService for ClusterServiceImpl {
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let command: Command = serde_json::from_slice(&request.into_inner().command)
            .map_err(|e| Status::invalid_argument(format!("Invalid command: {}", e)))?;
        tracing::debug!(command = command.name(), "Executing forwarded command");

        let response = match self.raft.client_write(command).await {
            Ok(written) => ExecuteResponse {
                success: true,
                error: String::new(),
                index: written.log_id.index,
                leader_id: self.local.raft_id(),
                changed: written.data.changed,
            },
            Err(e) => match extract_forward_to_leader(&e) {
                Some(leader) => ExecuteResponse {
                    success: false,
                    error: format!("Not the leader, leader is node {}", leader.leader_id),
                    index: 0,
                    leader_id: leader.leader_id,
                    changed: false,
                },
                None => ExecuteResponse {
                    success: false,
                    error: format!("Raft error: {}", e),
                    index: 0,
                    leader_id: 0,
                    changed: false,
                },
            },
        };
        Ok(Response::new(response))
    }

    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader_id = metrics.current_leader.unwrap_or(0);
        let membership = metrics.membership_config.membership();

        let voters = membership
            .voter_ids()
            .map(|raft_id| VoterInfo {
                raft_id,
                address: membership
                    .get_node(&raft_id)
                    .map(|node| node.addr.clone())
                    .unwrap_or_default(),
                is_leader: raft_id == leader_id,
            })
            .collect();

        Ok(Response::new(StatusResponse {
            raft_id: self.local.raft_id(),
            node_id: self.local.id.clone(),
            state: server_state_name(metrics.state).to_string(),
            leader_id,
            term: metrics.current_term,
            last_applied: metrics.last_applied.map_or(0, |id| id.index),
            voters,
        }))
    }
}
