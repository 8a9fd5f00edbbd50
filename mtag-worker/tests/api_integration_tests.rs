//! Integration tests for the review API

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use helpers::{candidate, create_test_env, test_engine, Fakes, TestEnv};
use http_body_util::BodyExt;
use mtag_worker::models::{JobId, JobState};
use mtag_worker::{build_router, Engine};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const THRESHOLD: u8 = 80;

/// Test helper: engine with `review` jobs in ReviewPending
async fn create_test_app(review: &[&str]) -> (TestEnv, Fakes, Engine, Vec<JobId>) {
    let env = create_test_env().await;
    let fakes = Fakes::new();
    let engine = test_engine(&env, &fakes, THRESHOLD);

    let mut ids = Vec::new();
    for (n, path) in review.iter().enumerate() {
        fakes.recognition.respond(
            path,
            vec![candidate(50.0 + n as f64, "T", "A", &format!("rg-{}", n), "B")],
        );
        ids.push(engine.producer.create_job(path).await.unwrap());
    }
    engine.workers.drain().await.unwrap();

    (env, fakes, engine, ids)
}

async fn send(engine: &Engine, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let app = build_router(engine.app_state());
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_env, _fakes, engine, _) = create_test_app(&[]).await;

    let (status, json) = send(&engine, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (_env, _fakes, engine, _) = create_test_app(&["/music/a.mp3", "/music/b.mp3"]).await;
    engine.producer.create_job("/music/new.mp3").await.unwrap();

    let (status, json) = send(&engine, "GET", "/api/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["review"], 2);
    assert_eq!(json["analysis"], 1);
    assert_eq!(json["done"], 0);
}

#[tokio::test]
async fn test_review_queue_listing() {
    let (_env, _fakes, engine, _) =
        create_test_app(&["/music/a.mp3", "/music/b.mp3", "/music/c.mp3"]).await;

    let (status, json) = send(&engine, "GET", "/api/queues/review?page=1&per_page=2", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["view"], "review");
    assert_eq!(json["total"], 3);
    assert_eq!(json["total_pages"], 2);
    let jobs = json["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    // Highest confidence first
    assert_eq!(jobs[0]["path"], "/music/c.mp3");
    assert_eq!(jobs[0]["state"], "review_pending");
}

#[tokio::test]
async fn test_unknown_queue_is_bad_request() {
    let (_env, _fakes, engine, _) = create_test_app(&[]).await;

    let (status, json) = send(&engine, "GET", "/api/queues/archive", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_get_job() {
    let (_env, _fakes, engine, ids) = create_test_app(&["/music/a.mp3"]).await;

    let (status, json) = send(&engine, "GET", &format!("/api/jobs/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], ids[0].0);
    assert_eq!(json["matched_meta"]["title"], "T");

    let (status, json) = send(&engine, "GET", "/api/jobs/9999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_approve_then_conflict() {
    let (env, _fakes, engine, ids) = create_test_app(&["/music/a.mp3"]).await;
    let uri = format!("/api/jobs/{}/approve", ids[0]);

    let (status, json) = send(&engine, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "approved");
    assert_eq!(
        env.store.get(ids[0]).await.unwrap().unwrap().state,
        JobState::ProcessingPending
    );

    let (status, json) = send(&engine, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_reject_unknown_job_is_not_found() {
    let (_env, _fakes, engine, _) = create_test_app(&[]).await;

    let (status, _) = send(&engine, "POST", "/api/jobs/77/reject", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_failed_job() {
    let (env, _fakes, engine, _) = create_test_app(&[]).await;
    let id = engine.producer.create_job("/music/unmatched.mp3").await.unwrap();
    engine.workers.drain().await.unwrap();
    assert_eq!(env.store.get(id).await.unwrap().unwrap().state, JobState::Failed);

    let (status, json) = send(&engine, "POST", &format!("/api/jobs/{}/retry", id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "retried");
    assert_eq!(
        env.store.get(id).await.unwrap().unwrap().state,
        JobState::AnalysisPending
    );
}

#[tokio::test]
async fn test_bulk_reject() {
    let (env, _fakes, engine, ids) = create_test_app(&["/music/a.mp3", "/music/b.mp3"]).await;

    let body = json!({ "job_ids": [ids[0].0, ids[1].0, 12345] });
    let (status, json) = send(&engine, "POST", "/api/bulk-reject", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["count"], 2);
    assert_eq!(env.store.queue_stats().await.unwrap().rejected, 2);
}

#[tokio::test]
async fn test_bulk_approve_empty_body() {
    let (_env, _fakes, engine, _) = create_test_app(&["/music/a.mp3"]).await;

    let (status, json) = send(&engine, "POST", "/api/bulk-approve", Some(json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 0);
}
