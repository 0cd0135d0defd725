//! Gossip wire messages.

use super::state::{MembershipUpdate, UserEvent};
use crate::node::ClusterNode;
use serde::{Deserialize, Serialize};

/// Messages exchanged between gossip peers over UDP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Direct probe.
    Ping {
        /// Originating node.
        from: ClusterNode,
        /// Sender's incarnation.
        incarnation: u64,
        /// Piggybacked membership rumors.
        rumors: Vec<MembershipUpdate>,
        /// Piggybacked durable events.
        events: Vec<UserEvent>,
    },
    /// Answer to a ping, possibly relayed on behalf of `from`.
    Ack {
        /// Node that was probed.
        from: ClusterNode,
        /// Incarnation of the probed node.
        incarnation: u64,
        /// Piggybacked membership rumors.
        rumors: Vec<MembershipUpdate>,
        /// Piggybacked durable events.
        events: Vec<UserEvent>,
    },
    /// Ask a relay to probe `target` for us.
    PingReq {
        /// Requesting node.
        from: ClusterNode,
        /// Node to probe.
        target: ClusterNode,
        /// Requester's incarnation.
        incarnation: u64,
        /// Piggybacked membership rumors.
        rumors: Vec<MembershipUpdate>,
    },
    /// Unsolicited dissemination.
    Gossip {
        /// Membership rumors.
        rumors: Vec<MembershipUpdate>,
        /// Durable events.
        events: Vec<UserEvent>,
    },
    /// Cluster-wide request expecting one response per member.
    Query {
        /// Correlates responses with the request.
        id: u64,
        /// Handler name.
        name: String,
        /// Requesting node.
        from: ClusterNode,
        /// Request body.
        payload: Vec<u8>,
    },
    /// Reply to a [`GossipMessage::Query`].
    QueryResponse {
        /// ID of the query being answered.
        id: u64,
        /// Responding node.
        from: ClusterNode,
        /// Response body.
        payload: Vec<u8>,
    },
}

impl GossipMessage {
    /// Drop one piggybacked item, the least important first.
    ///
    /// Tail rumors go before events; the leading rumor (the sender's own
    /// state) goes last. Returns `false` when nothing is left to drop.
    pub fn shed_piggyback(&mut self) -> bool {
        let (rumors, events) = match self {
            Self::Ping { rumors, events, .. }
            | Self::Ack { rumors, events, .. }
            | Self::Gossip { rumors, events } => (rumors, Some(events)),
            Self::PingReq { rumors, .. } => (rumors, None),
            Self::Query { .. } | Self::QueryResponse { .. } => return false,
        };
        if rumors.len() > 1 {
            rumors.pop();
            return true;
        }
        if events.is_some_and(|events| events.pop().is_some()) {
            return true;
        }
        rumors.pop().is_some()
    }
}
