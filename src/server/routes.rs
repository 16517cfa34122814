// ABOUTME: Request handlers for the HTTP API
// ABOUTME: Clone requests stream NDJSON progress; everything else returns JSON

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use super::{ApiError, AppState};
use crate::clone::ReadOnlyGuard;
use crate::logs::{LogLevel, LogQuery};
use crate::profile::{ConnectionProfile, Role};
use crate::scheduler::{JobUpdate, NewJob};

const DEFAULT_LOG_LIMIT: usize = 50;

type ApiResult = Result<Response, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    source: Option<ConnectionProfile>,
    target: Option<ConnectionProfile>,
}

/// Run one clone, streaming `{status, message}` lines until it finishes.
/// Invalid profiles are rejected before anything is streamed.
pub async fn clone_database(
    State(state): State<AppState>,
    payload: Result<Json<CloneRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let source = request
        .source
        .ok_or_else(|| ApiError::BadRequest("Missing required field: source".into()))?
        .with_role(Role::Source);
    let target = request
        .target
        .ok_or_else(|| ApiError::BadRequest("Missing required field: target".into()))?
        .with_role(Role::Target);
    ReadOnlyGuard::check_profiles(&source, &target)
        .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))?;

    tracing::info!("Starting clone from {} to {}", source, target);
    let mut session = state.runner.session(&source, &target);
    let events = session.subscribe();
    let mut logged = session.subscribe();

    let logs = state.logs.clone();
    tokio::spawn(async move {
        let forward = async {
            while let Some(event) = logged.recv().await {
                if let Some(entry) = event.log_entry() {
                    logs.record(entry).await;
                }
            }
        };
        let (result, ()) = tokio::join!(session.run(), forward);
        tracing::info!(
            "Clone from {} to {} finished in {}ms",
            source,
            target,
            result.duration_ms
        );
    });

    let lines = UnboundedReceiverStream::new(events)
        .filter_map(|event| event.to_wire())
        .map(|wire| {
            let mut line = serde_json::to_string(&wire).unwrap_or_default();
            line.push('\n');
            Ok::<_, Infallible>(line)
        });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult {
    let jobs = state.scheduler.list().await;
    Ok(Json(json!({ "success": true, "jobs": jobs })).into_response())
}

pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> ApiResult {
    let job = state.scheduler.create(body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "job": job.view() })),
    )
        .into_response())
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<JobUpdate>, JsonRejection>,
) -> ApiResult {
    let job = state.scheduler.update(&id, body(payload)?).await?;
    Ok(Json(json!({ "success": true, "job": job.view() })).into_response())
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.scheduler.delete(&id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

/// Start a run without waiting for it.
pub async fn run_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let job = state.scheduler.get(&id).await?;
    // The handle is dropped: the run continues detached
    state.scheduler.run_now(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": format!("Job '{}' started", job.name),
        })),
    )
        .into_response())
}

pub async fn job_history(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let history = state.scheduler.history(&id).await?;
    Ok(Json(json!({ "success": true, "history": history })).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    job_id: Option<String>,
    level: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    params: Result<Query<LogParams>, QueryRejection>,
) -> ApiResult {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let level = match params.level.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            raw.parse::<LogLevel>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
    };
    let query = LogQuery {
        job_id: params
            .job_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && id != "all"),
        level,
        limit: Some(params.limit.unwrap_or(DEFAULT_LOG_LIMIT)),
        offset: params.offset.unwrap_or(0),
    };
    let page = state.logs.query(&query).await;
    Ok(Json(json!({ "success": true, "logs": page.logs, "total": page.total })).into_response())
}

pub async fn log_stats(State(state): State<AppState>) -> ApiResult {
    let stats = state.logs.stats().await;
    Ok(Json(json!({ "success": true, "stats": stats })).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearParams {
    job_id: Option<String>,
}

pub async fn clear_logs(
    State(state): State<AppState>,
    params: Result<Query<ClearParams>, QueryRejection>,
) -> ApiResult {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job_id = params.job_id.filter(|id| !id.is_empty());
    let removed = state.logs.clear(job_id.as_deref()).await?;
    tracing::info!("Cleared {} log entries", removed);
    Ok(Json(json!({ "success": true, "removed": removed })).into_response())
}
