//! Error types for cluster operations.

use crate::types::RaftNodeId;
use openraft::BasicNode;
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Type alias for OpenRaft Raft errors.
pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<RaftNodeId, E>;

/// Type alias for OpenRaft RPC errors.
pub type RPCError<E = openraft::error::Infallible> =
    openraft::error::RPCError<RaftNodeId, BasicNode, RaftError<E>>;

/// Type alias for initialize errors.
pub type InitializeError = openraft::error::InitializeError<RaftNodeId, BasicNode>;

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Raft consensus error.
    #[error("Raft error: {0}")]
    Raft(String),

    /// Remote RPC returned an error status.
    #[error("Network error: {0}")]
    Network(#[from] tonic::Status),

    /// gRPC connection could not be established.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Node not found in cluster.
    #[error("Node {0} not found in cluster")]
    NodeNotFound(RaftNodeId),

    /// This node cannot serve the request and no leader is known.
    #[error("Not the leader, leader is node {leader:?}")]
    NotLeader {
        /// The current leader if known.
        leader: Option<RaftNodeId>,
    },

    /// The consensus group has not been bootstrapped yet.
    #[error("Cluster not initialized")]
    NotInitialized,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// None of the seed nodes answered during gossip join.
    #[error("Failed to join cluster: no seed reachable among {0:?}")]
    JoinFailed(Vec<String>),

    /// An operation did not finish before its deadline.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
        /// Time waited in milliseconds.
        elapsed_ms: u64,
    },

    /// A gossip message exceeded the UDP payload limit.
    #[error("Gossip message of {0} bytes exceeds the packet limit")]
    MessageTooLarge(usize),

    /// A persisted snapshot could not be read back.
    #[error("Snapshot {path} is corrupt: {reason}")]
    SnapshotCorrupt {
        /// Snapshot file.
        path: String,
        /// What failed.
        reason: String,
    },

    /// A project-scoped edit targeted a project that does not exist.
    #[error("Project {0} is not present in state")]
    ProjectNotFound(String),

    /// Configuration document error.
    #[error("Config error: {0}")]
    Core(#[from] sc_core::ConfigError),
}

impl ClusterError {
    pub(crate) fn timeout(operation: &'static str, elapsed: std::time::Duration) -> Self {
        ClusterError::Timeout {
            operation,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

impl<E: std::fmt::Debug> From<RaftError<E>> for ClusterError {
    fn from(e: RaftError<E>) -> Self {
        ClusterError::Raft(format!("{:?}", e))
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for ClusterError {
    fn from(e: bincode::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
