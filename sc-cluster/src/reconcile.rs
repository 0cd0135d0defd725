//! Leader-side loop keeping the Raft voter set in line with gossip.
//!
//! Membership changes are not acted on immediately: every change pushes a
//! deadline `delay` into the future, and the pass runs once the view has
//! been quiet that long. A periodic pass retries steps that failed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::ReconcileConfig;
use crate::membership::{MemberState, MembershipService};
use crate::node::ClusterNode;
use crate::raft::ConsensusLog;
use crate::types::RaftNodeId;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Node ids promoted to voter.
    pub added: Vec<String>,
    /// Raft ids removed from the voter set.
    pub removed: Vec<RaftNodeId>,
    /// Steps that were rejected and will be retried.
    pub failed: usize,
    /// The pass stopped because this node lost leadership.
    pub lost_leadership: bool,
}

/// Handle to the background reconciliation task.
pub struct ReconciliationLoop {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconciliationLoop {
    /// Spawn the loop.
    pub fn spawn(
        membership: Arc<MembershipService>,
        log: Arc<ConsensusLog>,
        config: ReconcileConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(membership, log, config, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Stop the loop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

async fn run(
    membership: Arc<MembershipService>,
    log: Arc<ConsensusLog>,
    config: ReconcileConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates = membership.subscribe();
    let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline: Option<Instant> = None;

    loop {
        let debounce = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            update = updates.recv() => match update {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    deadline = Some(Instant::now() + config.delay);
                }
                Err(RecvError::Closed) => break,
            },
            _ = debounce => {
                deadline = None;
                reconcile_once(&membership, &log).await;
            }
            _ = ticker.tick() => {
                reconcile_once(&membership, &log).await;
            }
        }
    }
    tracing::debug!("Reconciliation loop stopped");
}

/// Add missing voters and remove departed ones, one change at a time.
///
/// Does nothing unless this node leads the group, and stops as soon as it
/// no longer does. The local node is never removed and the voter set is
/// never emptied. Failed steps are logged and left for the next pass.
pub async fn reconcile_once(membership: &MembershipService, log: &ConsensusLog) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !log.is_leader() {
        return report;
    }

    let alive = membership.members();
    // Suspects may still refute, so they keep their vote for now.
    let present: BTreeSet<RaftNodeId> = alive
        .iter()
        .map(ClusterNode::raft_id)
        .chain(
            membership
                .snapshots()
                .into_iter()
                .filter(|member| member.state == MemberState::Suspect)
                .map(|member| member.node.raft_id()),
        )
        .collect();
    let voters = log.voters();

    let missing: Vec<&ClusterNode> = alive
        .iter()
        .filter(|node| !voters.contains(&node.raft_id()))
        .collect();
    let stale: Vec<RaftNodeId> = voters
        .iter()
        .copied()
        .filter(|id| !present.contains(id) && *id != log.raft_id())
        .collect();

    if missing.is_empty() && stale.is_empty() {
        return report;
    }
    tracing::info!(
        missing = missing.len(),
        stale = stale.len(),
        voters = voters.len(),
        "Reconciling voter set with membership"
    );

    for node in missing {
        if !log.is_leader() {
            report.lost_leadership = true;
            return report;
        }
        match log.add_voter(node).await {
            Ok(()) => report.added.push(node.id.clone()),
            Err(e) => {
                tracing::warn!(node = %node.id, error = %e, "Failed to add voter");
                report.failed += 1;
            }
        }
    }

    for raft_id in stale {
        if !log.is_leader() {
            report.lost_leadership = true;
            return report;
        }
        if log.voters().len() <= 1 {
            break;
        }
        match log.remove_voter(raft_id).await {
            Ok(()) => report.removed.push(raft_id),
            Err(e) => {
                tracing::warn!(raft_id, error = %e, "Failed to remove voter");
                report.failed += 1;
            }
        }
    }

    report
}
