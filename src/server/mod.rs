// ABOUTME: HTTP API for ad-hoc clones, job management and log queries
// ABOUTME: axum router over shared scheduler, log store and clone runner

mod routes;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::clone::CloneRunner;
use crate::logs::LogStore;
use crate::scheduler::{JobScheduler, SchedulerError};

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: JobScheduler,
    pub logs: Arc<LogStore>,
    pub runner: CloneRunner,
}

impl AppState {
    pub fn new(scheduler: JobScheduler, runner: CloneRunner) -> Self {
        let logs = Arc::clone(scheduler.logs());
        Self {
            scheduler,
            logs,
            runner,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/clone-database", post(routes::clone_database))
        .route(
            "/api/cron-jobs",
            get(routes::list_jobs).post(routes::create_job),
        )
        .route(
            "/api/cron-jobs/:id",
            patch(routes::update_job).delete(routes::delete_job),
        )
        .route("/api/cron-jobs/:id/run", post(routes::run_job))
        .route("/api/cron-jobs/:id/history", get(routes::job_history))
        .route(
            "/api/logs",
            get(routes::list_logs).delete(routes::clear_logs),
        )
        .route("/api/logs/stats", get(routes::log_stats))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves, then drain open requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!("HTTP API listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

/// Error response body: `{"success": false, "message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => {
                tracing::error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            e if e.is_validation() => ApiError::BadRequest(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}
