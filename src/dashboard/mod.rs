//! HTTP status API for one coordinator.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::cache::{MemoryCache, DEFAULT_JOB_TTL};
use crate::cluster::model::CoordinatorNode;
use crate::cluster::stats::{JobStats, JobStatsCache};
use crate::election::{CoordinatorRole, LeaderElection};
use crate::error::Result;
use crate::ownership::{JobOwnershipInfo, OwnershipRegistry};
use crate::scheduler::job::Job;
use crate::store::{CoordinatorNodeStore, JobStore};
use crate::tasks::{TaskHealth, TaskState};

#[derive(Clone)]
pub struct DashboardState {
    pub node_id: String,
    pub election: Arc<LeaderElection>,
    pub nodes: Arc<dyn CoordinatorNodeStore>,
    pub jobs: Arc<dyn JobStore>,
    pub registry: Arc<OwnershipRegistry>,
    pub cache: Arc<MemoryCache>,
    pub health: Arc<TaskHealth>,
    pub stats: Arc<JobStatsCache>,
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    node_id: String,
    tasks: BTreeMap<String, TaskState>,
}

#[derive(Serialize)]
struct ClusterStatusResponse {
    node_id: String,
    role: CoordinatorRole,
    epoch: u64,
    leader_since: Option<DateTime<Utc>>,
    stats: JobStats,
    nodes: Vec<CoordinatorNode>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/cluster", get(cluster_status_handler))
        .route("/api/jobs/owned", get(owned_jobs_handler))
        .route("/api/jobs/:id", get(job_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the status API on `addr` until `shutdown` fires. Failing to bind
/// is returned to the caller.
pub async fn run_dashboard(
    addr: SocketAddr,
    state: DashboardState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting status API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let healthy = state.health.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            healthy,
            node_id: state.node_id.clone(),
            tasks: state.health.snapshot(),
        }),
    )
}

async fn cluster_status_handler(State(state): State<DashboardState>) -> Response {
    let election = state.election.state().await;
    match state.nodes.list().await {
        Ok(nodes) => Json(ClusterStatusResponse {
            node_id: state.node_id.clone(),
            role: election.role,
            epoch: election.epoch,
            leader_since: election.leader_since,
            stats: state.stats.snapshot(),
            nodes,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list coordinator nodes");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn owned_jobs_handler(State(state): State<DashboardState>) -> Json<Vec<JobOwnershipInfo>> {
    Json(state.registry.snapshot())
}

async fn job_handler(State(state): State<DashboardState>, Path(job_id): Path<Uuid>) -> Response {
    let key = state.cache.keys().job(job_id);
    if let Some(job) = state.cache.get::<Job>(&key) {
        return Json(job).into_response();
    }

    match state.jobs.get(job_id).await {
        Ok(Some(job)) => {
            if let Err(e) = state.cache.set(&key, &job, DEFAULT_JOB_TTL) {
                tracing::debug!(job_id = %job_id, error = %e, "Failed to cache job view");
            }
            Json(job).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {} not found", job_id)),
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to load job");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
