//! Status API tests, driven through the router without binding a socket.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use baton::cluster::CoordinatorNode;
use baton::config::CoordinatorConfig;
use baton::dashboard::router;
use baton::lock::MemoryLockProvider;
use baton::node::Coordinator;
use baton::ownership::JobOwnershipInfo;
use baton::scheduler::Job;
use baton::store::Stores;
use baton::tasks::TaskState;
use baton::transport::MemoryBus;

fn coordinator(stores: &Stores) -> Arc<Coordinator> {
    Arc::new(
        Coordinator::new(
            CoordinatorConfig::new("dash-node"),
            stores.clone(),
            Arc::new(MemoryLockProvider::new()),
            Arc::new(MemoryBus::new().connect()),
        )
        .unwrap(),
    )
}

fn app(coordinator: &Coordinator) -> Router {
    router(coordinator.dashboard_state())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

/// Test 1: Health reports every task and turns 503 when one fails
#[tokio::test]
async fn test_health_endpoint() {
    let stores = Stores::in_memory();
    let node = coordinator(&stores);

    node.health().set("node-heartbeat", TaskState::Running);
    let (status, json) = get(app(&node), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["healthy"], true);
    assert_eq!(json["node_id"], "dash-node");
    assert_eq!(json["tasks"]["node-heartbeat"]["state"], "running");

    node.health()
        .set("assignment-subscriber", TaskState::Failed("subscribe refused".into()));
    let (status, json) = get(app(&node), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["healthy"], false);
    assert_eq!(json["tasks"]["assignment-subscriber"]["reason"], "subscribe refused");
}

/// Test 2: Cluster view lists node records and this node's role
#[tokio::test]
async fn test_cluster_endpoint() {
    let stores = Stores::in_memory();
    let node = coordinator(&stores);
    stores
        .nodes
        .upsert(CoordinatorNode::new("dash-node", Utc::now()))
        .await
        .unwrap();
    stores
        .nodes
        .upsert(CoordinatorNode::new("other-node", Utc::now()))
        .await
        .unwrap();

    let (status, json) = get(app(&node), "/api/cluster").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["node_id"], "dash-node");
    assert_eq!(json["role"], "Follower");
    assert_eq!(json["epoch"], 0);
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(json["stats"]["owned"], 0);
}

/// Test 3: Owned jobs come from this node's registry
#[tokio::test]
async fn test_owned_jobs_endpoint() {
    let stores = Stores::in_memory();
    let node = coordinator(&stores);
    let job_id = Uuid::new_v4();
    node.registry().claim(JobOwnershipInfo {
        job_id,
        node_id: "dash-node".to_string(),
        execution_id: Uuid::new_v4(),
        claimed_at: Utc::now(),
    });

    let (status, json) = get(app(&node), "/api/jobs/owned").await;
    assert_eq!(status, StatusCode::OK);
    let owned = json.as_array().unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0]["job_id"], job_id.to_string());
}

/// Test 4: Job lookup returns the stored job or a JSON 404
#[tokio::test]
async fn test_job_endpoint() {
    let stores = Stores::in_memory();
    let node = coordinator(&stores);
    let job = stores
        .jobs
        .enqueue(Job::new("email", "default", r#"{"to":"ops"}"#))
        .await
        .unwrap();

    let (status, json) = get(app(&node), &format!("/api/jobs/{}", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], job.id.to_string());
    assert_eq!(json["job_type"], "email");
    assert_eq!(json["status"], "Pending");

    // Served from the cache on the second read.
    let (status, _) = get(app(&node), &format!("/api/jobs/{}", job.id)).await;
    assert_eq!(status, StatusCode::OK);

    let missing = Uuid::new_v4();
    let (status, json) = get(app(&node), &format!("/api/jobs/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains(&missing.to_string()));
}
