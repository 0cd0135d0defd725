//! Outbound Raft RPC over gRPC.

use std::sync::Arc;

use openraft::BasicNode;
use openraft::error::{InstallSnapshotError, NetworkError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::pool::ChannelPool;
use crate::error::{RPCError, RaftError};
use crate::proto;
use crate::proto::raft_service_client::RaftServiceClient;
use crate::types::{RaftNodeId, TypeConfig};

/// Creates connections to Raft peers, sharing one [`ChannelPool`].
#[derive(Clone)]
pub struct NetworkClient {
    pool: Arc<ChannelPool>,
}

impl NetworkClient {
    /// Create a client on top of `pool`.
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkClient {
    type Network = PeerConnection;

    async fn new_client(&mut self, target: RaftNodeId, node: &BasicNode) -> Self::Network {
        PeerConnection {
            target,
            addr: node.addr.clone(),
            pool: Arc::clone(&self.pool),
        }
    }
}

/// Raft RPC endpoint of one peer.
pub struct PeerConnection {
    target: RaftNodeId,
    addr: String,
    pool: Arc<ChannelPool>,
}

#[derive(Clone, Copy)]
enum Rpc {
    AppendEntries,
    Vote,
    InstallSnapshot,
}

impl PeerConnection {
    /// Send one JSON-encoded request and decode the peer's answer.
    ///
    /// The peer encodes `Result<Resp, RaftError<E>>`, so remote Raft errors
    /// come back as [`RPCError::RemoteError`].
    async fn call<Req, Resp, E>(&self, rpc: Rpc, req: &Req) -> Result<Resp, RPCError<E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let data = serde_json::to_vec(req).map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        let channel = self
            .pool
            .get(&self.addr)
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))?;
        let mut client = RaftServiceClient::new(channel);

        let reply = match rpc {
            Rpc::AppendEntries => client
                .append_entries(proto::AppendEntriesRequest { data })
                .await
                .map(|r| r.into_inner().data),
            Rpc::Vote => client
                .request_vote(proto::VoteRequest { data })
                .await
                .map(|r| r.into_inner().data),
            Rpc::InstallSnapshot => client
                .install_snapshot(proto::InstallSnapshotRequest { data })
                .await
                .map(|r| r.into_inner().data),
        };
        let reply = reply.map_err(|status| {
            self.pool.evict(&self.addr);
            RPCError::Unreachable(Unreachable::new(&status))
        })?;

        let result: Result<Resp, RaftError<E>> =
            serde_json::from_slice(&reply).map_err(|e| RPCError::Network(NetworkError::new(&e)))?;
        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<TypeConfig> for PeerConnection {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<RaftNodeId>, RPCError> {
        self.call(Rpc::AppendEntries, &req).await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<RaftNodeId>, RPCError<InstallSnapshotError>> {
        self.call(Rpc::InstallSnapshot, &req).await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<RaftNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<RaftNodeId>, RPCError> {
        self.call(Rpc::Vote, &req).await
    }
}
