//! HTTP management API, exercised in-process through the router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use runbook_scheduler::api::{router, state::AppState};
use runbook_scheduler::config::SchedulerConfig;
use runbook_scheduler::scheduler::ManualClock;
use runbook_scheduler::storage::open_in_memory_pool;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap()));
    let components =
        runbook_scheduler::assemble(open_in_memory_pool().unwrap(), &SchedulerConfig::default(), clock);
    router(AppState {
        schedules: components.service,
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor", "alice");
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "runbookId": "rb-1",
        "name": "rotate certs",
        "frequency": "HOURLY",
        "environment": "staging"
    })
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_create_get_and_list() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/v1/schedules", Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED);

    let schedule = &body["data"];
    assert_eq!(schedule["frequency"], "HOURLY");
    assert_eq!(schedule["isActive"], true);
    assert_eq!(schedule["createdBy"], "alice");
    assert_eq!(schedule["timezone"], "UTC");
    assert_eq!(schedule["nextRunAt"], "2024-03-04T09:30:00Z");
    let id = schedule["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/api/v1/schedules/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "rotate certs");

    let (status, body) = send(&app, "GET", "/api/v1/runbooks/rb-1/schedules", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);

    let (_, body) = send(&app, "GET", "/api/v1/runbooks/rb-1/executions", None).await;
    assert_eq!(body["meta"]["total"], 0);
}

#[tokio::test]
async fn test_pause_resume_update_delete() {
    let app = app();
    let (_, body) = send(&app, "POST", "/api/v1/schedules", Some(create_body())).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", &format!("/api/v1/schedules/{}/pause", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);
    assert_eq!(body["data"]["nextRunAt"], "2024-03-04T09:30:00Z");

    let (status, body) = send(&app, "POST", &format!("/api/v1/schedules/{}/resume", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], true);

    let patch = json!({ "frequency": "CRON", "cronExpression": "0 12 * * *" });
    let (status, body) = send(&app, "PATCH", &format!("/api/v1/schedules/{}", id), Some(patch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cronExpression"], "0 12 * * *");
    assert_eq!(body["data"]["nextRunAt"], "2024-03-04T12:00:00Z");

    let (status, body) = send(&app, "GET", &format!("/api/v1/schedules/{}/preview?count=3", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["data"]["upcoming"][1], "2024-03-05T12:00:00Z");

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/schedules/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &format!("/api/v1/schedules/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let app = app();

    let missing_cron = json!({
        "runbookId": "rb-1",
        "name": "broken",
        "frequency": "CRON",
        "environment": "staging"
    });
    let (status, _) = send(&app, "POST", "/api/v1/schedules", Some(missing_cron)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_cron = json!({
        "runbookId": "rb-1",
        "name": "broken",
        "frequency": "CRON",
        "cronExpression": "* * *",
        "environment": "staging"
    });
    let (status, body) = send(&app, "POST", "/api/v1/schedules", Some(bad_cron)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("expected 5 fields"));

    let out_of_range = json!({
        "runbookId": "rb-1",
        "name": "broken",
        "frequency": "CRON",
        "cronExpression": "0 25 * * *",
        "environment": "staging"
    });
    let (status, body) = send(&app, "POST", "/api/v1/schedules", Some(out_of_range)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("hour"));

    let (status, _) = send(&app, "POST", "/api/v1/schedules/nope/pause", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/v1/nothing-here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
