//! Inbound Raft RPC.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tonic::{Request, Response, Status};

use crate::proto;
use crate::proto::raft_service_server::RaftService;
use crate::types::ClusterRaft;

/// Serves Raft RPC from peers against the local Raft instance.
pub struct RaftServer {
    raft: Arc<ClusterRaft>,
}

impl RaftServer {
    /// Create a server for `raft`.
    pub fn new(raft: Arc<ClusterRaft>) -> Self {
        Self { raft }
    }
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, Status> {
    serde_json::from_slice(data).map_err(|e| Status::invalid_argument(e.to_string()))
}

// Raft errors travel inside the payload so the caller can tell a rejected
// request from an unreachable peer.
fn encode<T: Serialize>(result: &T) -> Result<Vec<u8>, Status> {
    serde_json::to_vec(result).map_err(|e| Status::internal(e.to_string()))
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn append_entries(
        &self,
        request: Request<proto::AppendEntriesRequest>,
    ) -> Result<Response<proto::AppendEntriesResponse>, Status> {
        let req = decode(&request.into_inner().data)?;
        let result = self.raft.append_entries(req).await;
        Ok(Response::new(proto::AppendEntriesResponse {
            data: encode(&result)?,
        }))
    }

    async fn request_vote(
        &self,
        request: Request<proto::VoteRequest>,
    ) -> Result<Response<proto::VoteResponse>, Status> {
        let req = decode(&request.into_inner().data)?;
        let result = self.raft.vote(req).await;
        Ok(Response::new(proto::VoteResponse {
            data: encode(&result)?,
        }))
    }

    async fn install_snapshot(
        &self,
        request: Request<proto::InstallSnapshotRequest>,
    ) -> Result<Response<proto::InstallSnapshotResponse>, Status> {
        let req = decode(&request.into_inner().data)?;
        let result = self.raft.install_snapshot(req).await;
        Ok(Response::new(proto::InstallSnapshotResponse {
            data: encode(&result)?,
        }))
    }
}
