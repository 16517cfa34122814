// ABOUTME: HTTP API tests driven through the axum router without a socket
// ABOUTME: Checks status codes, JSON shapes and the streamed clone response

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use database_cloner::clone::CloneRunner;
use database_cloner::logs::LogStore;
use database_cloner::row::RowValue;
use database_cloner::scheduler::{JobScheduler, JobStore};
use database_cloner::server::{router, AppState};
use database_cloner::testing::{MemoryConnector, MemoryServer, TableSpec};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    scheduler: JobScheduler,
    target: MemoryServer,
}

fn app() -> TestApp {
    let source = MemoryServer::new();
    source.add_table("shop", TableSpec::new("items").column("id").primary_key(&["id"]));
    source.load_rows(
        "shop",
        "items",
        (1..=25).map(|i| vec![RowValue::Int(i)]).collect(),
    );
    let target = MemoryServer::new();

    let runner = CloneRunner::new(Arc::new(MemoryConnector::new(source, target.clone())));
    let scheduler = JobScheduler::new(
        JobStore::in_memory(),
        Arc::new(LogStore::in_memory(1000)),
        runner.clone(),
    );
    TestApp {
        router: router(AppState::new(scheduler.clone(), runner)),
        scheduler,
        target,
    }
}

fn source_json() -> Value {
    json!({ "host": "source-host", "user": "reader", "password": "pw", "database": "shop" })
}

fn target_json() -> Value {
    json!({ "host": "target-host", "user": "writer", "password": "pw", "database": "shop_copy" })
}

fn job_json(schedule: &str) -> Value {
    json!({
        "name": "nightly",
        "schedule": schedule,
        "source": source_json(),
        "target": target_json(),
    })
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_create_job_rejects_invalid_cron() {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/api/cron-jobs", Some(job_json("not-a-cron"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("Invalid cron expression 'not-a-cron'"));

    let (_, list) = send_json(&app, "GET", "/api/cron-jobs", None).await;
    assert_eq!(list["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/cron-jobs")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_lifecycle() {
    let app = app();

    let (status, created) = send_json(&app, "POST", "/api/cron-jobs", Some(job_json("0 2 * * *"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["success"], true);
    let id = created["job"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["job"]["enabled"], true);

    let (status, listed) = send(&app, "GET", "/api/cron-jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_slice(&listed).unwrap();
    let job = &listed["jobs"][0];
    assert_eq!(job["id"], id.as_str());
    assert_eq!(job["source"]["password"], "***");
    assert!(job["nextRun"].is_string());

    let (status, patched) = send_json(
        &app,
        "PATCH",
        &format!("/api/cron-jobs/{}", id),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["job"]["enabled"], false);
    assert!(patched["job"]["nextRun"].is_null());

    let (status, body) = send_json(
        &app,
        "PATCH",
        "/api/cron-jobs/does-not-exist",
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, deleted) = send_json(&app, "DELETE", &format!("/api/cron-jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);

    let (_, listed) = send_json(&app, "GET", "/api/cron-jobs", None).await;
    assert!(listed["jobs"].as_array().unwrap().is_empty());
    app.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_clone_streams_progress_lines() {
    let app = app();

    let (status, bytes) = send(
        &app,
        "POST",
        "/api/clone-database",
        Some(json!({ "source": source_json(), "target": target_json() })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let lines: Vec<Value> = String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines[0], json!({ "status": "progress", "message": "Connecting to source database..." }));
    let last = lines.last().unwrap();
    assert_eq!(last["status"], "success");
    assert!(last["message"].as_str().unwrap().starts_with("Database cloned successfully!"));
    assert!(lines[..lines.len() - 1].iter().all(|l| l["status"] == "progress"));

    assert_eq!(app.target.row_count("shop_copy", "items"), 25);
}

#[tokio::test]
async fn test_streamed_clone_results_reach_the_log() {
    let app = app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/clone-database",
        Some(json!({ "source": source_json(), "target": target_json() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Entries are written by the session task, which may trail the stream
    let mut logs = Vec::new();
    for _ in 0..50 {
        let (_, body) = send_json(&app, "GET", "/api/logs?level=success", None).await;
        if body["total"] == 1 {
            let (_, all) = send_json(&app, "GET", "/api/logs", None).await;
            logs = all["logs"].as_array().unwrap().clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let table = logs
        .iter()
        .find(|entry| entry["metadata"]["tableName"] == "items")
        .expect("per-table result was not logged");
    assert_eq!(table["level"], "info");
    assert_eq!(table["message"], "✓ items: 25 rows copied successfully");
    assert!(table.get("jobId").is_none());

    let finished = logs
        .iter()
        .find(|entry| entry["level"] == "success")
        .unwrap();
    assert!(finished["message"]
        .as_str()
        .unwrap()
        .starts_with("Database cloned successfully!"));
    assert_eq!(finished["metadata"]["tablesCloned"], 1);
    assert!(logs.iter().all(|entry| entry["message"] != "Connecting to source database..."));
}

#[tokio::test]
async fn test_log_query_treats_all_job_ids_as_no_filter() {
    let app = app();
    let (status, _) = send_json(&app, "POST", "/api/cron-jobs", Some(job_json("0 2 * * *"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, unfiltered) = send_json(&app, "GET", "/api/logs", None).await;
    assert_eq!(unfiltered["total"], 1);

    let (status, all) = send_json(
        &app,
        "GET",
        "/api/logs?jobId=all&level=all&limit=50&offset=0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 1);
    assert_eq!(all["logs"][0]["jobName"], "nightly");
    app.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_clone_rejects_same_database_before_streaming() {
    let app = app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/clone-database",
        Some(json!({ "source": source_json(), "target": source_json() })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(app.target.journal().is_empty());
}

#[tokio::test]
async fn test_run_now_history_and_logs() {
    let app = app();
    let (_, created) = send_json(&app, "POST", "/api/cron-jobs", Some(job_json("0 2 * * *"))).await;
    let id = created["job"]["id"].as_str().unwrap().to_string();

    let (status, started) = send_json(&app, "POST", &format!("/api/cron-jobs/{}/run", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["message"], "Job 'nightly' started");

    let mut history = Value::Null;
    for _ in 0..50 {
        let (_, body) = send_json(&app, "GET", &format!("/api/cron-jobs/{}/history", id), None).await;
        if !body["history"].as_array().unwrap().is_empty() {
            history = body["history"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(history[0]["trigger"], "manual");
    assert_eq!(history[0]["success"], true);

    let (status, logs) = send_json(
        &app,
        "GET",
        &format!("/api/logs?jobId={}&level=success", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["logs"][0]["jobName"], "nightly");

    let (_, all) = send_json(&app, "GET", &format!("/api/logs?jobId={}&level=all&limit=1", id), None).await;
    assert_eq!(all["logs"].as_array().unwrap().len(), 1);
    assert!(all["total"].as_u64().unwrap() >= 3);

    let (_, stats) = send_json(&app, "GET", "/api/logs/stats", None).await;
    assert_eq!(stats["stats"]["byLevel"]["success"], 1);
    assert!(stats["stats"]["byJob"][id.as_str()].as_u64().unwrap() >= 3);

    let (status, cleared) = send_json(&app, "DELETE", &format!("/api/logs?jobId={}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared["removed"].as_u64().unwrap() >= 3);

    let (_, after) = send_json(&app, "GET", &format!("/api/logs?jobId={}", id), None).await;
    assert_eq!(after["total"], 0);
    app.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_invalid_log_level_is_bad_request() {
    let app = app();
    let (status, body) = send_json(&app, "GET", "/api/logs?level=loud", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}
