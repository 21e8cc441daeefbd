//! In-process scenario tests for dvt-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use dvt_daemon::{routes, state::AppState};
use dvt_testkit::{engine_context, silent_sources, PausedClock, DEVICE};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_state() -> Arc<AppState> {
    Arc::new(AppState::new(engine_context(
        silent_sources(),
        Arc::new(PausedClock::new()),
    )))
}

async fn call(st: &Arc<AppState>, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = routes::build_router(Arc::clone(st))
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

async fn wait_until_idle(st: &Arc<AppState>) {
    while !st.sessions.list().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let st = make_state();
    let (status, json) = call(&st, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "dvt-daemon");
}

// ---------------------------------------------------------------------------
// Session lifecycle over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_start_is_400_and_creates_nothing() {
    let st = make_state();
    let (status, json) = call(
        &st,
        post_json("/v1/sessions", json!({"device_id": DEVICE, "num_sensors": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("unsupported sensor count 4"));

    let (status, json) = call(&st, post_json("/v1/sessions", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "missing required parameter: device_id");

    let (_, json) = call(&st, get("/v1/sessions")).await;
    assert_eq!(json["sessions"], json!([]));
}

#[tokio::test]
async fn start_list_filter_stop() {
    let st = make_state();

    let (status, json) = call(
        &st,
        post_json(
            "/v1/sessions",
            json!({"device_id": DEVICE, "num_sensors": 3, "ui": "Puglia", "timeout_minutes": 5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = json["session_id"].as_str().unwrap().to_string();

    let (_, json) = call(&st, get("/v1/sessions")).await;
    let sessions = json["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], id.as_str());
    assert_eq!(sessions[0]["cardinality"], 3);
    assert_eq!(sessions[0]["location"], "Puglia");
    assert_eq!(sessions[0]["filter"]["historical_mode"], false);

    let (status, json) = call(
        &st,
        post_json(
            &format!("/v1/sessions/{id}/filter"),
            json!({"historical_mode": true, "time_window_minutes": 30}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["event"], "filter_updated");
    assert_eq!(json["data"]["historical_mode"], true);

    let (_, json) = call(&st, get("/v1/sessions")).await;
    assert_eq!(json["sessions"][0]["filter"]["time_window_minutes"], 30);

    let (status, json) = call(&st, delete(&format!("/v1/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["event"], "monitoring_stopped");

    wait_until_idle(&st).await;
    let (status, _) = call(&st, delete(&format!("/v1/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_or_malformed_ids_are_404() {
    let st = make_state();
    let ghost = dvt_schemas::SessionId::new();
    for uri in [
        format!("/v1/sessions/{ghost}/stream"),
        "/v1/sessions/not-a-uuid/stream".to_string(),
    ] {
        let (status, _) = call(&st, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, json) = call(
        &st,
        post_json(
            &format!("/v1/sessions/{ghost}/filter"),
            json!({"historical_mode": true, "time_window_minutes": 10}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("unknown session"));
    let (status, _) = call(&st, delete("/v1/sessions/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// GET /v1/sessions/:id/stream (SSE)
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stream_carries_session_events() {
    let st = make_state();
    let (_, json) = call(&st, post_json("/v1/sessions", json!({"device_id": DEVICE}))).await;
    let id = json["session_id"].as_str().unwrap().to_string();

    let resp = routes::build_router(Arc::clone(&st))
        .oneshot(get(&format!("/v1/sessions/{id}/stream")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = resp.into_body();
    let mut seen = String::new();
    while !seen.contains("event: alarms_update") {
        let frame = body.frame().await.expect("stream ended").unwrap();
        if let Ok(data) = frame.into_data() {
            seen.push_str(&String::from_utf8_lossy(&data));
        }
    }
    assert!(seen.contains("event: metrics_update"));
    assert!(seen.contains("\"total_expected\":16"));

    let (status, _) = call(&st, delete(&format!("/v1/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn stream_closes_after_monitoring_timeout() {
    let st = make_state();
    let (_, json) = call(
        &st,
        post_json(
            "/v1/sessions",
            json!({"device_id": DEVICE, "timeout_minutes": 1}),
        ),
    )
    .await;
    let id = json["session_id"].as_str().unwrap().to_string();

    let resp = routes::build_router(Arc::clone(&st))
        .oneshot(get(&format!("/v1/sessions/{id}/stream")))
        .await
        .unwrap();
    let mut body = resp.into_body();
    let mut seen = String::new();
    while !seen.contains("event: monitoring_timeout") {
        let frame = body.frame().await.expect("stream ended").unwrap();
        if let Ok(data) = frame.into_data() {
            seen.push_str(&String::from_utf8_lossy(&data));
        }
    }

    // Keep-alives would arrive every 15s if the stream stayed open.
    let next = tokio::time::timeout(Duration::from_secs(300), body.frame())
        .await
        .expect("stream still open after the terminal event");
    assert!(next.is_none());

    wait_until_idle(&st).await;
    let (status, _) = call(&st, get(&format!("/v1/sessions/{id}/stream"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
