//! Multi-node cluster tests.
//!
//! Tests bootstrap, replication, forwarding, failover and late joins.

mod common;

use std::time::Duration;

use common::{TestCluster, wait_until};
use sc_core::Project;
use serial_test::serial;

/// Nodes racing to bootstrap end up in one group with the same voters.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_concurrent_bootstrap_single_group() {
    let mut cluster = TestCluster::start(3).await;

    cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");

    let converged = wait_until(Duration::from_secs(15), || {
        let sets = cluster.voter_sets();
        sets.len() == 3 && sets[0].len() == 3 && sets.iter().all(|set| *set == sets[0])
    })
    .await;
    assert!(converged, "Voter sets diverged: {:?}", cluster.voter_sets());

    let leaders: Vec<_> = cluster
        .alive()
        .filter_map(|node| node.consensus())
        .filter_map(|log| log.leader())
        .collect();
    assert!(leaders.windows(2).all(|pair| pair[0] == pair[1]));

    for node in cluster.alive() {
        assert_eq!(node.alive_node_count(), 3);
    }

    cluster.shutdown().await;
}

/// Token ranges computed independently partition the space.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_token_ranges_cover_space() {
    let mut cluster = TestCluster::start(3).await;

    assert!(
        wait_until(Duration::from_secs(10), || {
            cluster.alive().all(|node| node.alive_node_count() == 3)
        })
        .await
    );

    let mut ranges: Vec<_> = cluster
        .alive()
        .map(|node| node.assigned_tokens().expect("Every member owns a range"))
        .collect();
    ranges.sort_by_key(|range| range.start);
    assert_eq!(ranges[0].start, 0);
    assert_eq!(ranges[2].end, 99);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end + 1, pair[1].start);
    }

    cluster.shutdown().await;
}

/// Writes on the leader reach every replica; followers forward writes.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_replication_and_forwarding() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    assert!(
        wait_until(Duration::from_secs(15), || {
            cluster.voter_sets().iter().all(|set| set.len() == 3)
        })
        .await
    );

    cluster.nodes[leader]
        .as_ref()
        .unwrap()
        .set_project(Project::new("p1"))
        .await
        .expect("Leader write should succeed");

    let replicated = wait_until(Duration::from_secs(5), || {
        cluster
            .alive()
            .all(|node| node.get_config().projects == vec![Project::new("p1")])
    })
    .await;
    assert!(replicated, "p1 should reach every node");

    let follower = (0..3).find(|i| *i != leader).unwrap();
    let node = cluster.nodes[follower].as_ref().unwrap();
    node.set_project(Project::new("p2"))
        .await
        .expect("Follower write should be forwarded");
    // Returns only after the follower applied it
    assert!(node.get_project("p2").is_some());

    cluster.shutdown().await;
}

/// After the leader dies a new one is elected and writes still commit.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_leader_failover() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    assert!(
        wait_until(Duration::from_secs(15), || {
            cluster.voter_sets().iter().all(|set| set.len() == 3)
        })
        .await
    );

    cluster.nodes[leader]
        .as_ref()
        .unwrap()
        .set_project(Project::new("p1"))
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            cluster.alive().all(|node| node.get_project("p1").is_some())
        })
        .await
    );

    cluster.kill(leader).await;

    let new_leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Survivors should elect a new leader");
    assert_ne!(new_leader, leader);

    cluster.nodes[new_leader]
        .as_ref()
        .unwrap()
        .delete_project("p1")
        .await
        .expect("Delete should commit on the new leader");

    let converged = wait_until(Duration::from_secs(5), || {
        cluster.alive().all(|node| node.get_config().projects.is_empty())
    })
    .await;
    assert!(converged, "Delete should reach the survivors");

    // The dead node is dropped from the voter set once gossip declares it gone
    let shrunk = wait_until(Duration::from_secs(15), || {
        cluster.voter_sets().iter().all(|set| set.len() == 2)
    })
    .await;
    assert!(shrunk, "Voters: {:?}", cluster.voter_sets());

    cluster.shutdown().await;
}

/// A node started after bootstrap joins the existing group as a voter.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn test_late_joiner_becomes_voter() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    assert!(
        wait_until(Duration::from_secs(15), || {
            cluster.voter_sets().iter().all(|set| set.len() == 3)
        })
        .await
    );
    cluster.nodes[leader]
        .as_ref()
        .unwrap()
        .set_project(Project::new("p1"))
        .await
        .unwrap();

    let joiner = cluster.add_node().await;
    let joiner_id = cluster.nodes[joiner].as_ref().unwrap().local().raft_id();

    let promoted = wait_until(Duration::from_secs(15), || {
        let sets = cluster.voter_sets();
        sets.len() == 4 && sets.iter().all(|set| set.len() == 4 && set.contains(&joiner_id))
    })
    .await;
    assert!(promoted, "Voters: {:?}", cluster.voter_sets());

    let node = cluster.nodes[joiner].as_ref().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || node.get_project("p1").is_some()).await,
        "Joiner should catch up on the existing config"
    );
    assert!(!node.is_leader());
    node.set_project(Project::new("p2"))
        .await
        .expect("Joiner write should be forwarded");
    assert!(node.get_project("p2").is_some());

    cluster.shutdown().await;
}
