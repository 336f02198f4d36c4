use std::sync::Arc;

use indoc::indoc;
use integration_tests::{FailingStore, TestServer};

#[tokio::test]
async fn health_is_not_rate_limited() {
    let config = indoc! {r#"
        [server.rate_limit]
        trust_forwarded_headers = true

        [server.rate_limit.default]
        max_attempts = 1
    "#};

    let server = TestServer::builder().build(config).await;

    for _ in 0..5 {
        let response = server.client.get_as("1.2.3.4", "/health").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    // The limiter still counts everything else.
    assert_eq!(server.client.get_as("1.2.3.4", "/api/posts").await.status(), 404);
    assert_eq!(server.client.get_as("1.2.3.4", "/api/posts").await.status(), 429);
}

#[tokio::test]
async fn custom_health_path() {
    let config = indoc! {r#"
        [server.health]
        path = "/status"
    "#};

    let server = TestServer::builder().build(config).await;

    let response = server.client.get("/status").await;
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"status":"healthy"}"#);
}

#[tokio::test]
async fn health_disabled() {
    let config = indoc! {r#"
        [server.health]
        enabled = false
    "#};

    let server = TestServer::builder().build(config).await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn degraded_when_store_is_down() {
    let server = TestServer::builder().store(Arc::new(FailingStore)).build("").await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"status":"degraded","storage":"unreachable"}"#);
}
