//! One-time group initialization coordinated over gossip.
//!
//! A starting node asks its peers whether the group already exists. If
//! nobody says so, it initializes the group with every member it currently
//! sees and announces it with a durable gossip event, so nodes joining later
//! skip the question entirely. Concurrent first starts are harmless: Raft
//! refuses to initialize a log that already holds state.

use std::sync::Arc;
use std::time::Duration;

use super::log::ConsensusLog;
use crate::error::ClusterResult;
use crate::membership::MembershipService;

/// Query answered by every node with its bootstrap state.
pub const BOOTSTRAP_STATUS_QUERY: &str = "bootstrap-status";

/// Durable event emitted after a successful bootstrap.
pub const BOOTSTRAP_DONE_EVENT: &str = "bootstrap-done";

const STATUS_DONE: &[u8] = b"done";
const STATUS_PENDING: &[u8] = b"pending";

/// What [`bootstrap_cluster`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This node initialized the group.
    Bootstrapped,
    /// A peer reported the group as initialized; this node waits to be added.
    AlreadyDone,
    /// Initialization was attempted but the log already held state.
    LostRace,
}

/// Answer `bootstrap-status` queries from peers.
pub fn register_status_handler(membership: &MembershipService, log: &Arc<ConsensusLog>) {
    let log = Arc::clone(log);
    let state = Arc::clone(membership.state());
    membership.set_query_handler(BOOTSTRAP_STATUS_QUERY, move |_| {
        if state.has_event(BOOTSTRAP_DONE_EVENT) || log.is_initialized() {
            STATUS_DONE.to_vec()
        } else {
            STATUS_PENDING.to_vec()
        }
    });
}

/// Run the bootstrap protocol for the local node.
pub async fn bootstrap_cluster(
    membership: &MembershipService,
    log: &ConsensusLog,
    query_timeout: Duration,
) -> ClusterResult<BootstrapOutcome> {
    if membership.has_event(BOOTSTRAP_DONE_EVENT) {
        tracing::info!("Cluster already bootstrapped, joining as follower");
        return Ok(BootstrapOutcome::AlreadyDone);
    }

    let responses = membership
        .query(BOOTSTRAP_STATUS_QUERY, Vec::new(), query_timeout)
        .await?;
    if let Some(done) = responses.iter().find(|r| r.payload == STATUS_DONE) {
        tracing::info!(peer = %done.from.id, "Peer reports cluster bootstrapped, joining as follower");
        return Ok(BootstrapOutcome::AlreadyDone);
    }
    if membership.has_event(BOOTSTRAP_DONE_EVENT) {
        return Ok(BootstrapOutcome::AlreadyDone);
    }

    let voters = membership.members();
    tracing::info!(
        voters = voters.len(),
        answered = responses.len(),
        "No bootstrapped peer found, initializing consensus group"
    );
    if log.bootstrap(&voters).await? {
        membership
            .emit_event(BOOTSTRAP_DONE_EVENT, Vec::new())
            .await?;
        Ok(BootstrapOutcome::Bootstrapped)
    } else {
        Ok(BootstrapOutcome::LostRace)
    }
}
