//! Type definitions for OpenRaft integration.
//!
//! OpenRaft requires a type configuration that specifies all the concrete types
//! used in the Raft implementation. Log entries carry [`Command`]s and the
//! state machine answers with a [`CommandResponse`].

use crate::command::{Command, CommandResponse};
use openraft::BasicNode;
use std::io::Cursor;

/// Raft-level node ID.
///
/// Cluster members are identified by a string (their address); the consensus
/// layer uses the FNV-1a hash of that string, see [`crate::ClusterNode::raft_id`].
pub type RaftNodeId = u64;

openraft::declare_raft_types!(
    /// OpenRaft type configuration for the config log.
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
);

/// Type alias for Raft instance.
pub type ClusterRaft = openraft::Raft<TypeConfig>;

/// Type alias for log entry.
pub type ClusterEntry = openraft::Entry<TypeConfig>;

/// Type alias for vote.
pub type ClusterVote = openraft::Vote<RaftNodeId>;

/// Type alias for log ID.
pub type ClusterLogId = openraft::LogId<RaftNodeId>;

/// Type alias for stored membership.
pub type ClusterStoredMembership = openraft::StoredMembership<RaftNodeId, BasicNode>;

/// Type alias for snapshot metadata.
pub type ClusterSnapshotMeta = openraft::SnapshotMeta<RaftNodeId, BasicNode>;

/// Type alias for snapshot.
pub type ClusterSnapshot = openraft::storage::Snapshot<TypeConfig>;

/// Type alias for storage error.
pub type ClusterStorageError = openraft::StorageError<RaftNodeId>;

/// Type alias for raft metrics.
pub type ClusterMetrics = openraft::RaftMetrics<RaftNodeId, BasicNode>;

/// Type alias for client write error.
pub type ClusterClientWriteError = openraft::error::ClientWriteError<RaftNodeId, BasicNode>;

/// Type alias for raft error with client write error.
pub type ClusterRaftWriteError = openraft::error::RaftError<RaftNodeId, ClusterClientWriteError>;

/// Information about the leader to forward requests to.
#[derive(Debug, Clone)]
pub struct LeaderInfo {
    /// The leader's node ID.
    pub leader_id: RaftNodeId,
    /// The leader's address (may be empty if unknown).
    pub leader_addr: String,
}

/// Extract forward-to-leader info from a client write error.
///
/// Returns `Some(LeaderInfo)` if the error is a ForwardToLeader error with
/// a known leader ID, `None` otherwise.
pub fn extract_forward_to_leader(error: &ClusterRaftWriteError) -> Option<LeaderInfo> {
    use openraft::error::RaftError;

    match error {
        RaftError::APIError(ClusterClientWriteError::ForwardToLeader(forward)) => {
            forward.leader_id.map(|leader_id| LeaderInfo {
                leader_id,
                leader_addr: forward
                    .leader_node
                    .as_ref()
                    .map(|n| n.addr.clone())
                    .unwrap_or_default(),
            })
        }
        _ => None,
    }
}

/// True if a client write failed only because this node is not the leader.
pub fn is_forward_to_leader(error: &ClusterRaftWriteError) -> bool {
    matches!(
        error,
        openraft::error::RaftError::APIError(ClusterClientWriteError::ForwardToLeader(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::RaftTypeConfig;

    #[test]
    fn test_snapshot_data_is_an_in_memory_cursor() {
        let data: <TypeConfig as RaftTypeConfig>::SnapshotData = Cursor::new(b"{}".to_vec());
        assert_eq!(data.into_inner(), b"{}".to_vec());
    }
}
