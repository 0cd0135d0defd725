//! Voter reconciliation driven by hand.
//!
//! The background loop is pushed out of the way so each pass can be
//! observed through its report.

mod common;

use std::time::Duration;

use common::{TestCluster, wait_until};
use sc_cluster::{ClusterManager, ReconcileReport, reconcile_once};
use serial_test::serial;

const NEVER: Duration = Duration::from_secs(3600);

async fn manual_cluster(nodes: usize) -> TestCluster {
    TestCluster::start_with(nodes, |config| {
        config.reconcile.delay = NEVER;
        config.reconcile.interval = NEVER;
    })
    .await
}

async fn reconcile(node: &ClusterManager) -> ReconcileReport {
    reconcile_once(
        node.membership().expect("clustered"),
        node.consensus().expect("clustered"),
    )
    .await
}

/// Elect a leader and make sure all members vote.
async fn settle(cluster: &TestCluster, members: usize) -> usize {
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let node = cluster.nodes[leader].as_ref().unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || node.alive_node_count() == members).await
    );
    reconcile(node).await;
    assert!(
        wait_until(Duration::from_secs(10), || {
            cluster.voter_sets().iter().all(|set| set.len() == members)
        })
        .await,
        "Voters: {:?}",
        cluster.voter_sets()
    );
    leader
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_converged_group_needs_nothing() {
    let mut cluster = manual_cluster(3).await;
    settle(&cluster, 3).await;

    for node in cluster.alive() {
        // Followers never act; the leader finds nothing to change.
        assert_eq!(reconcile(node).await, ReconcileReport::default());
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_dead_voter_is_removed() {
    let mut cluster = manual_cluster(3).await;
    let leader = settle(&cluster, 3).await;

    let victim = (0..3).find(|i| *i != leader).unwrap();
    let victim_id = cluster.nodes[victim].as_ref().unwrap().local().raft_id();
    cluster.kill(victim).await;

    let node = cluster.nodes[leader].as_ref().unwrap();
    let membership = node.membership().unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            membership.members().len() == 2 && membership.stats().suspect == 0
        })
        .await,
        "Gossip should declare the stopped node dead"
    );

    let report = reconcile(node).await;
    assert_eq!(report.removed, vec![victim_id]);
    assert!(report.added.is_empty());
    assert_eq!(report.failed, 0);

    let voters = node.consensus().unwrap().voters();
    assert_eq!(voters.len(), 2);
    assert!(voters.contains(&node.local().raft_id()));

    // The next pass has nothing left to do.
    assert_eq!(reconcile(node).await, ReconcileReport::default());

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_new_member_is_promoted() {
    let mut cluster = manual_cluster(2).await;
    let leader = settle(&cluster, 2).await;

    let joiner = cluster.add_node().await;
    let joiner_node = cluster.nodes[joiner].as_ref().unwrap();
    let joiner_id = joiner_node.local().raft_id();
    assert!(joiner_node.consensus().unwrap().voters().len() <= 2);

    let node = cluster.nodes[leader].as_ref().unwrap();
    assert!(wait_until(Duration::from_secs(10), || node.alive_node_count() == 3).await);

    let report = reconcile(node).await;
    assert_eq!(report.added, vec![joiner_node.local().id.clone()]);
    assert!(report.removed.is_empty());
    assert!(node.consensus().unwrap().voters().contains(&joiner_id));

    cluster.shutdown().await;
}
