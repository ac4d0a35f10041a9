//! Failover tests for leader lease loss and recovery.
//!
//! These tests verify that exactly one coordinator leads at a time, that
//! leadership moves when the leader stops or dies, and that node records
//! follow those changes.


use std::time::Duration;

use baton::cluster::NodeStatus;
use baton::election::CoordinatorRole;
use test_harness::{wait_until, TestCluster};

/// Test 1: Exactly one leader is elected in a fresh cluster
#[tokio::test]
async fn test_single_leader_elected() {
    let cluster = TestCluster::new(3).await;

    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");

    // Give the losers a few retry rounds to make sure none of them also wins.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cluster.count_leaders(), 1, "Exactly one leader should exist");

    cluster.shutdown().await;
}

/// Test 2: Graceful leader shutdown hands over promptly and signs the node off
#[tokio::test]
async fn test_graceful_leader_shutdown() {
    let mut cluster = TestCluster::new(3).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    let leader_id = cluster.node(leader).node_id.clone();

    assert!(cluster.shutdown_node(leader).await, "Leader should stop cleanly");

    // The lease is released on shutdown, so a follower takes over within a
    // couple of retry rounds rather than a full lease duration.
    let new_leader = cluster
        .wait_for_new_leader(leader, Duration::from_secs(2))
        .await
        .expect("New leader should be elected");
    assert_ne!(new_leader, leader);
    assert_eq!(cluster.count_leaders(), 1);

    let record = cluster
        .stores
        .nodes
        .get(&leader_id)
        .await
        .unwrap()
        .expect("Stopped node should keep its record");
    assert_eq!(record.status, NodeStatus::Offline);
    assert_eq!(record.role, CoordinatorRole::Follower);

    cluster.shutdown().await;
}

/// Test 3: A crashed leader is replaced once its lease expires
#[tokio::test]
async fn test_crashed_leader_replaced_after_lease_expiry() {
    let mut cluster = TestCluster::new(3).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    let old_epoch = cluster.node(leader).epoch().await;
    let leader_id = cluster.node(leader).node_id.clone();

    assert!(cluster.crash_node(leader).await);

    let new_leader = cluster
        .wait_for_new_leader(leader, Duration::from_secs(5))
        .await
        .expect("New leader should be elected after the lease expires");
    assert!(cluster.node(new_leader).epoch().await >= 1);
    assert!(old_epoch >= 1);

    // The new leader's health monitor notices the missing heartbeats.
    let nodes = cluster.stores.nodes.clone();
    let marked = wait_until(Duration::from_secs(5), || {
        let nodes = nodes.clone();
        let leader_id = leader_id.clone();
        async move {
            matches!(
                nodes.get(&leader_id).await,
                Ok(Some(node)) if node.status == NodeStatus::Offline
            )
        }
    })
    .await;
    assert!(marked, "Crashed node should be marked offline");

    cluster.shutdown().await;
}

/// Test 4: Node records mirror the current roles
#[tokio::test]
async fn test_node_records_follow_roles() {
    let cluster = TestCluster::new(3).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    let leader_id = cluster.node(leader).node_id.clone();

    let nodes = cluster.stores.nodes.clone();
    let settled = wait_until(Duration::from_secs(3), || {
        let nodes = nodes.clone();
        let leader_id = leader_id.clone();
        async move {
            let Ok(records) = nodes.list().await else {
                return false;
            };
            records.len() == 3
                && records.iter().all(|n| {
                    n.status == NodeStatus::Active
                        && (n.role == CoordinatorRole::Leader) == (n.node_id == leader_id)
                })
        }
    })
    .await;
    assert!(settled, "Every node should be active with exactly one leader record");

    cluster.shutdown().await;
}

/// Test 5: A restarted cluster still converges on a single leader
#[tokio::test]
async fn test_leadership_survives_successive_failures() {
    let mut cluster = TestCluster::new(3).await;

    let first = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Leader should be elected");
    assert!(cluster.shutdown_node(first).await);

    let second = cluster
        .wait_for_new_leader(first, Duration::from_secs(5))
        .await
        .expect("Second leader should be elected");
    assert!(cluster.crash_node(second).await);

    let third = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Last node should take over");
    assert_ne!(third, first);
    assert_ne!(third, second);
    assert!(cluster.node(third).epoch().await >= 1);
    assert_eq!(cluster.count_leaders(), 1);

    cluster.shutdown().await;
}
