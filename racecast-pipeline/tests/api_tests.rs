//! HTTP surface tests driven through the router with `tower::ServiceExt::oneshot`

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::{
    create_test_store, seed_meeting, test_orchestrator, test_settings, RaceFixture,
    ScriptedSource,
};
use http_body_util::BodyExt;
use racecast_common::config::PipelineConfig;
use racecast_common::events::EventBus;
use racecast_pipeline::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn test_state() -> (TempDir, AppState) {
    let source = Arc::new(ScriptedSource::new());
    seed_meeting(
        &source,
        &[
            RaceFixture::new(1),
            RaceFixture::new(2),
            RaceFixture::new(3).without_distance(),
        ],
    );
    let (dir, store) = create_test_store().await;
    let bus = EventBus::default();
    let orchestrator = test_orchestrator(source, store.clone(), bus.clone(), test_settings());
    let state = AppState::new(
        store.pool().clone(),
        bus,
        orchestrator,
        PipelineConfig::default(),
    );
    (dir, state)
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_models() {
    let (_dir, state) = test_state().await;

    let (status, body) = send(&state, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "racecast-pipeline");
    assert_eq!(body["active_triggers"], 0);
    assert!(body["model_versions"].as_str().unwrap().contains("form@"));
}

#[tokio::test]
async fn test_trigger_then_query_predictions() {
    // Given: a meeting of three races, one without a distance
    let (_dir, state) = test_state().await;

    // When: a manual trigger runs for the meeting date
    let (status, body) = send(&state, post_json("/trigger", json!({"date": "2026-10-18"}))).await;

    // Then: two predictions and one unavailable race are reported
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["race_date"], "2026-10-18");
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["failed"], 1);
    let summary = body["summary"].as_str().unwrap();
    assert!(summary.contains("2 of 3 races available"));
    assert!(summary.contains("prediction unavailable for race 2026-10-18/TOKYO/R3"));
    assert!(state.active_triggers.read().await.is_empty());

    // And: the stored predictions are served back
    let (status, list) = send(&state, get("/predictions?from=2026-10-18")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 2);

    let (status, one) = send(&state, get("/predictions/2026-10-18/TOKYO/R1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["race"]["race_number"], 1);
    assert_eq!(one["ranking"].as_array().unwrap().len(), 6);

    let (status, history) = send(&state, get("/predictions/2026-10-18/TOKYO/2/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_forced_trigger_adds_history() {
    let (_dir, state) = test_state().await;

    send(&state, post_json("/trigger", json!({"date": "2026-10-18"}))).await;
    let (status, _) = send(
        &state,
        post_json("/trigger", json!({"date": "2026-10-18", "force": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = send(&state, get("/predictions/2026-10-18/TOKYO/R1/history")).await;
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_prediction_is_not_found() {
    let (_dir, state) = test_state().await;

    let (status, body) = send(&state, get("/predictions/2026-10-18/TOKYO/R9")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let (_dir, state) = test_state().await;

    let (status, body) = send(&state, get("/predictions/2026-13-40/TOKYO/R1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].is_string());

    let (status, _) = send(&state, get("/predictions/2026-10-18/TOKYO/R0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, post_json("/trigger", json!({"date": "18/10/2026"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trigger_for_running_date_conflicts() {
    let (_dir, state) = test_state().await;
    let date = chrono::NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
    state
        .active_triggers
        .write()
        .await
        .insert(date, uuid::Uuid::new_v4());

    let (status, body) = send(&state, post_json("/trigger", json!({"date": "2026-10-18"}))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}
