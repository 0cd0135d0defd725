//! Cluster member identity.

use crate::tokens::fnv1a;
use crate::types::RaftNodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A process taking part in the cluster.
///
/// Identity is the node's address string; it is fixed for the lifetime of the
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Stable identifier, by default the advertised Raft address.
    pub id: String,
    /// UDP address used for gossip.
    pub gossip_addr: SocketAddr,
    /// `host:port` of the Raft gRPC endpoint.
    pub raft_addr: String,
}

impl ClusterNode {
    /// Create a node description.
    pub fn new(id: impl Into<String>, gossip_addr: SocketAddr, raft_addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gossip_addr,
            raft_addr: raft_addr.into(),
        }
    }

    /// The ID this node uses inside the consensus group.
    pub fn raft_id(&self) -> RaftNodeId {
        fnv1a(self.id.as_bytes())
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gossip {}, raft {})", self.id, self.gossip_addr, self.raft_addr)
    }
}
