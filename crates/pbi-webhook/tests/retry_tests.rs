// SPDX-License-Identifier: MIT OR Apache-2.0
//! Webhook delivery retry scenario (distilled spec §8 scenario 6): an
//! endpoint responds 500 then 200, both attempts carry the same
//! `deliveryId`, and the consumer can reproduce the signature from the
//! `X-PBI-Timestamp`/`X-PBI-Signature` headers. Exercised against a mock
//! HTTP endpoint rather than a live Postgres instance, since the retry
//! contract lives entirely in `send_signed`'s wire format.

use pbi_webhook::{send_signed, verify_signature};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn endpoint_failing_once_then_succeeding_is_retried_with_reproducible_signatures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/hook", server.uri());
    let secret = b"endpoint-secret-0123456789abcdef";
    let delivery_id = Uuid::new_v4();
    let payload = r#"{"id":"evt_1","type":"receipt.created"}"#;

    let first = send_signed(&http, &url, secret, delivery_id, payload)
        .await
        .expect("first POST completes");
    assert_eq!(first.status.as_u16(), 500);

    let second = send_signed(&http, &url, secret, delivery_id, payload)
        .await
        .expect("second POST completes");
    assert_eq!(second.status.as_u16(), 200);

    // Both attempts carry the same deliveryId, per the at-least-once
    // retry contract; the consumer recomputes HMAC-SHA-256 over
    // `<timestamp>.<deliveryId>.<rawBody>` and compares in constant time.
    assert!(verify_signature(secret, first.timestamp, delivery_id, payload, &first.signature));
    assert!(verify_signature(secret, second.timestamp, delivery_id, payload, &second.signature));

    let requests = server.received_requests().await.expect("request log enabled by default");
    assert_eq!(requests.len(), 2);
    for req in &requests {
        assert_eq!(
            req.headers.get("x-pbi-delivery-id").unwrap().to_str().unwrap(),
            delivery_id.to_string()
        );
        assert_eq!(req.headers.get("x-pbi-event").unwrap().to_str().unwrap(), "receipt.created");
        assert!(req.headers.get("x-pbi-signature").unwrap().to_str().unwrap().starts_with("v1="));
    }
}

#[tokio::test]
async fn wrong_secret_fails_signature_verification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/hook", server.uri());
    let delivery_id = Uuid::new_v4();
    let payload = r#"{"id":"evt_2"}"#;

    let sent = send_signed(&http, &url, b"real-secret", delivery_id, payload)
        .await
        .expect("POST completes");

    assert!(!verify_signature(b"wrong-secret", sent.timestamp, delivery_id, payload, &sent.signature));
}
