// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-cutting middleware tests: rate limiting and CORS.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pbi_daemon::build_app;
use pbi_daemon::middleware::CorsConfig;
use tower::ServiceExt;

#[tokio::test]
async fn exceeding_rate_limit_returns_429() {
    let mut state = support::test_state();
    state.rate_limiter = std::sync::Arc::new(pbi_ratelimit::RateLimiter::new(
        pbi_ratelimit::RateLimitConfig::new(60, 1),
    ));
    let app = build_app(state, support::permissive_cors());

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/health").header("authorization", "Bearer tok").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(Request::builder().uri("/health").header("authorization", "Bearer tok").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rate_limit_buckets_are_keyed_per_caller() {
    let mut state = support::test_state();
    state.rate_limiter = std::sync::Arc::new(pbi_ratelimit::RateLimiter::new(
        pbi_ratelimit::RateLimitConfig::new(60, 1),
    ));
    let app = build_app(state, support::permissive_cors());

    let caller_a = app
        .clone()
        .oneshot(Request::builder().uri("/health").header("authorization", "Bearer aaa").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(caller_a.status(), StatusCode::OK);

    let caller_b = app
        .oneshot(Request::builder().uri("/health").header("authorization", "Bearer bbb").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(caller_b.status(), StatusCode::OK, "a distinct caller gets its own bucket");
}

#[tokio::test]
async fn cors_preflight_echoes_allowed_origin() {
    let app = build_app(support::test_state(), support::permissive_cors());

    let resp = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/pbi/challenge")
                .header("origin", "https://example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").map(|v| v.to_str().unwrap()),
        Some("https://example.com")
    );
}

#[test]
fn cors_layer_builds_from_config() {
    let config = CorsConfig {
        allowed_origins: vec!["https://a.test".into(), "not a valid header value\n".into()],
        allowed_methods: vec!["GET".into()],
        allowed_headers: vec!["authorization".into()],
    };
    let _layer = config.to_cors_layer();
}
