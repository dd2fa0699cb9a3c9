// SPDX-License-Identifier: MIT OR Apache-2.0
//! Health endpoint tests for the daemon.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pbi_daemon::build_app;
use tower::ServiceExt;

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn health_returns_ok_status() {
    let app = build_app(support::test_state(), support::permissive_cors());

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
}

#[tokio::test]
async fn health_carries_request_id_header() {
    let app = build_app(support::test_state(), support::permissive_cors());

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(resp.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_app(support::test_state(), support::permissive_cors());

    let resp = app
        .oneshot(Request::builder().uri("/v1/pbi/nonexistent").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
