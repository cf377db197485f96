//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use super::ApiError;
use crate::scheduler::{CreateSchedule, UpdateSchedule};

/// Header carrying the identity of the caller, recorded as `createdBy`.
pub const ACTOR_HEADER: &str = "x-actor";

const DEFAULT_PREVIEW_COUNT: usize = 5;

type ApiResult = Result<Json<Value>, ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/schedules", post(create_schedule))
        .route(
            "/schedules/{id}",
            get(get_schedule).patch(update_schedule).delete(delete_schedule),
        )
        .route("/schedules/{id}/pause", post(pause_schedule))
        .route("/schedules/{id}/resume", post(resume_schedule))
        .route("/schedules/{id}/preview", get(preview_schedule))
        .route("/runbooks/{runbook_id}/schedules", get(list_runbook_schedules))
        .route("/runbooks/{runbook_id}/executions", get(list_runbook_executions))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn create_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<CreateSchedule>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    req.created_by = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let schedule = state.schedules.create(req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": schedule }))))
}

async fn get_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let schedule = state.schedules.get(&id).await?;
    Ok(Json(json!({ "data": schedule })))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateSchedule>,
) -> ApiResult {
    let schedule = state.schedules.update(&id, patch).await?;
    Ok(Json(json!({ "data": schedule })))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.schedules.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let schedule = state.schedules.pause(&id).await?;
    Ok(Json(json!({ "data": schedule })))
}

async fn resume_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let schedule = state.schedules.resume(&id).await?;
    Ok(Json(json!({ "data": schedule })))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    count: Option<usize>,
}

async fn preview_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult {
    let runs = state
        .schedules
        .preview(&id, query.count.unwrap_or(DEFAULT_PREVIEW_COUNT))
        .await?;
    Ok(Json(json!({
        "data": { "upcoming": runs },
        "meta": { "total": runs.len() }
    })))
}

async fn list_runbook_schedules(
    State(state): State<AppState>,
    Path(runbook_id): Path<String>,
) -> ApiResult {
    let schedules = state.schedules.list_for_runbook(&runbook_id).await?;
    Ok(Json(json!({
        "data": schedules,
        "meta": { "total": schedules.len() }
    })))
}

async fn list_runbook_executions(
    State(state): State<AppState>,
    Path(runbook_id): Path<String>,
) -> ApiResult {
    let executions = state.schedules.list_executions_for_runbook(&runbook_id).await?;
    Ok(Json(json!({
        "data": executions,
        "meta": { "total": executions.len() }
    })))
}
