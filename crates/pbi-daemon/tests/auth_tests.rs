// SPDX-License-Identifier: MIT OR Apache-2.0
//! Authentication-rejection tests: missing/malformed bearer tokens must be
//! rejected before any handler reaches the database.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pbi_daemon::build_app;
use serde_json::json;
use tower::ServiceExt;

async fn call(app: axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn challenge_mint_without_authorization_header_is_rejected() {
    let app = build_app(support::test_state(), support::permissive_cors());
    let req = Request::builder()
        .method("POST")
        .uri("/v1/pbi/challenge")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"purpose": "ACTION_COMMIT", "actionHashHex": "a".repeat(64)}).to_string(),
        ))
        .unwrap();

    let (status, body) = call(app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_api_key");
}

#[tokio::test]
async fn verify_with_malformed_authorization_scheme_is_rejected() {
    let app = build_app(support::test_state(), support::permissive_cors());
    let req = Request::builder()
        .method("POST")
        .uri("/v1/pbi/verify")
        .header("authorization", "Basic deadbeef")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "challengeId": "00000000-0000-0000-0000-000000000000",
                "assertion": {
                    "authenticatorDataB64url": "",
                    "clientDataJsonB64url": "",
                    "signatureB64url": "",
                    "credIdB64url": "",
                    "pubKeyPem": ""
                }
            })
            .to_string(),
        ))
        .unwrap();

    let (status, body) = call(app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_api_key");
}

#[tokio::test]
async fn receipts_list_without_authorization_header_is_rejected() {
    let app = build_app(support::test_state(), support::permissive_cors());
    let req = Request::builder()
        .uri("/v1/pbi/receipts")
        .body(Body::empty())
        .unwrap();

    let (status, _) = call(app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn billing_usage_without_authorization_header_is_rejected() {
    let app = build_app(support::test_state(), support::permissive_cors());
    let req = Request::builder()
        .uri("/v1/billing/usage")
        .body(Body::empty())
        .unwrap();

    let (status, _) = call(app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
