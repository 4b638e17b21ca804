//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. Runs are driven through the real engine with a
//! fixed seed.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use coinflip_core::{EngineConfig, Simulator};
use coinflip_observer::router::build_router;
use coinflip_observer::state::AppState;
use coinflip_types::RunState;
use serde_json::Value;
use tower::ServiceExt;

// =========================================================================
// Helpers
// =========================================================================

fn make_test_state() -> Arc<AppState> {
    let mut config = EngineConfig::default();
    config.engine.seed = Some(17);
    config.engine.worker_count = 2;
    config.publisher.update_interval_ms = 20;
    config.publisher.statistics_interval_ms = 50;
    Arc::new(AppState::new(Arc::new(Simulator::new(&config))))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post(router: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn wait_for_completion(state: &AppState) {
    let mut watch = state.simulator.watch_state();
    tokio::time::timeout(
        Duration::from_secs(30),
        watch.wait_for(|s| *s == RunState::Completed),
    )
    .await
    .unwrap()
    .unwrap();
}

// =========================================================================
// Status page and catalog
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
}

#[tokio::test]
async fn test_list_patterns() {
    let router = build_router(make_test_state());

    let (status, json) = get(&router, "/api/patterns").await;

    assert_eq!(status, StatusCode::OK);
    let map = json.as_object().unwrap();
    assert_eq!(map.len(), 10);
    assert!(map.contains_key("2_consecutive_tails"));
    assert!(map.contains_key("heads_tails_heads"));
}

// =========================================================================
// Idle engine
// =========================================================================

#[tokio::test]
async fn test_status_is_idle_initially() {
    let router = build_router(make_test_state());

    let (status, json) = get(&router, "/api/simulation/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "idle");
    assert_eq!(json["defaults"]["pattern_type"], "2_consecutive_tails");
}

#[tokio::test]
async fn test_statistics_when_idle_are_zeroed() {
    let router = build_router(make_test_state());

    let (status, json) = get(&router, "/api/statistics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_sessions"], 0);
    assert_eq!(json["completion_rate"], 0.0);
    assert_eq!(json["is_running"], false);
}

#[tokio::test]
async fn test_stop_when_idle_is_conflict() {
    let router = build_router(make_test_state());

    let (status, json) = post(&router, "/api/simulation/stop", "").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(json["status"], 409);
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn test_start_with_unknown_pattern_is_bad_request() {
    let state = make_test_state();
    let router = build_router(Arc::clone(&state));

    let (status, json) = post(
        &router,
        "/api/simulation/start",
        r#"{"pattern_type": "five_heads"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("five_heads"));
    assert_eq!(state.simulator.state(), RunState::Idle);
}

#[tokio::test]
async fn test_start_with_non_positive_count_is_bad_request() {
    let router = build_router(make_test_state());

    let (status, _) = post(&router, "/api/simulation/start", r#"{"num_sessions": 0}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &router,
        "/api/simulation/start",
        r#"{"max_flips_per_session": -5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let router = build_router(make_test_state());

    let (status, json) = post(&router, "/api/simulation/start", "{oops").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_invalid_session_filter_is_bad_request() {
    let router = build_router(make_test_state());

    let (status, _) = get(&router, "/api/sessions?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&router, "/api/sessions/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =========================================================================
// Full lifecycle
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configure_then_start_uses_stored_defaults() {
    let state = make_test_state();
    let router = build_router(Arc::clone(&state));

    let (status, json) = post(
        &router,
        "/api/simulation/configure",
        r#"{"pattern_type": "heads_tails_heads", "num_sessions": 40}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["settings"]["num_sessions"], 40);

    let (status, json) = post(&router, "/api/simulation/start", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["run"]["settings"]["pattern_type"], "heads_tails_heads");

    wait_for_completion(&state).await;

    let (_, stats) = get(&router, "/api/statistics").await;
    assert_eq!(stats["total_sessions"], 40);
    assert_eq!(stats["completed_sessions"], 40);
    assert_eq!(stats["theoretical_ev"], 10.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_after_completed_run() {
    let state = make_test_state();
    let router = build_router(Arc::clone(&state));

    let (status, _) = post(
        &router,
        "/api/simulation/start",
        r#"{"pattern_type": "2_consecutive_heads", "num_sessions": 25, "max_flips_per_session": 500}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A second start while the first run exists is a conflict.
    let (status, _) = post(&router, "/api/simulation/start", "").await;
    assert_eq!(status, StatusCode::CONFLICT);

    wait_for_completion(&state).await;

    let (status, json) = get(&router, "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 25);
    assert_eq!(json["sessions"][0]["session_id"], 0);

    let (_, json) = get(&router, "/api/sessions?status=active").await;
    assert_eq!(json["count"], 0);

    let (_, json) = get(&router, "/api/sessions?status=completed&limit=5").await;
    assert_eq!(json["count"], 5);

    let (status, json) = get(&router, "/api/sessions/3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session_id"], 3);
    assert_eq!(json["completed"], true);

    let (status, json) = get(&router, "/api/sessions/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);

    let (status, json) = post(&router, "/api/simulation/reset", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["run"]["state"], "idle");

    let (_, json) = get(&router, "/api/sessions").await;
    assert_eq!(json["count"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_while_running_is_conflict() {
    let mut config = EngineConfig::default();
    config.engine.seed = Some(3);
    config.engine.round_interval_ms = 50;
    config.engine.flips_per_slice = 1;
    let state = Arc::new(AppState::new(Arc::new(Simulator::new(&config))));
    let router = build_router(Arc::clone(&state));

    let (status, _) = post(
        &router,
        "/api/simulation/start",
        r#"{"pattern_type": "4_consecutive_heads", "num_sessions": 4, "max_flips_per_session": 100000}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&router, "/api/simulation/reset", "").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = post(&router, "/api/simulation/stop", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["run"]["state"], "stopped");

    let (status, _) = post(&router, "/api/simulation/reset", "").await;
    assert_eq!(status, StatusCode::OK);
}
