mod redis;

use std::sync::Arc;

use indoc::indoc;
use integration_tests::{FailingStore, TestServer};
use serde_json::json;

const TRUSTED: &str = indoc! {r#"
    [server.rate_limit]
    trust_forwarded_headers = true

    [server.rate_limit.default]
    max_attempts = 3
    decay_minutes = 1
    block_minutes = 5
"#};

fn header(response: &reqwest::Response, name: &str) -> String {
    response.headers()[name].to_str().unwrap().to_string()
}

#[tokio::test]
async fn remaining_counts_down_then_blocks() {
    let server = TestServer::builder().with_upstream().build(TRUSTED).await;

    let mut remaining = Vec::new();

    for _ in 0..3 {
        let response = server.client.get_as("1.2.3.4", "/api/posts").await;
        assert_eq!(response.status(), 200);
        assert_eq!(header(&response, "x-ratelimit-limit"), "3");
        remaining.push(header(&response, "x-ratelimit-remaining"));
    }

    insta::assert_debug_snapshot!(remaining, @r#"
    [
        "2",
        "1",
        "0",
    ]
    "#);

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(response.status(), 429);
    assert_eq!(header(&response, "retry-after"), "300");
    assert_eq!(header(&response, "content-type"), "application/json");
    assert!(response.headers().get("x-ratelimit-limit").is_none());

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":429,"message":"Too many requests, please try again later.","data":{"retry_after":300}}"#);

    // Blocked requests never reach the blog API.
    assert_eq!(server.upstream().hits(), 3);
}

#[tokio::test]
async fn reset_is_about_one_decay_window_ahead() {
    let server = TestServer::builder().build(TRUSTED).await;

    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    let reset: i64 = header(&response, "x-ratelimit-reset").parse().unwrap();

    assert!(reset >= before + 59, "reset {reset} too early");
    assert!(reset <= before + 62, "reset {reset} too late");
}

#[tokio::test]
async fn origins_are_isolated() {
    let server = TestServer::builder().build(TRUSTED).await;

    for _ in 0..3 {
        server.client.get_as("1.2.3.4", "/api/posts").await;
    }

    assert_eq!(server.client.get_as("1.2.3.4", "/api/posts").await.status(), 429);

    let response = server.client.get_as("5.6.7.8", "/api/posts").await;
    assert_eq!(response.status(), 404);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");

    // Same origin, different path or method: separate counters.
    let response = server.client.get_as("1.2.3.4", "/api/comments").await;
    assert_eq!(response.status(), 404);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");

    let response = server
        .client
        .request(reqwest::Method::DELETE, "/api/posts")
        .header("x-forwarded-for", "1.2.3.4")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");
}

#[tokio::test]
async fn query_string_shares_the_counter() {
    let server = TestServer::builder().build(TRUSTED).await;

    server.client.get_as("1.2.3.4", "/api/posts?page=1").await;
    server.client.get_as("1.2.3.4", "/api/posts?page=2").await;

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
}

#[tokio::test]
async fn forwarded_headers_ignored_unless_trusted() {
    let config = indoc! {r#"
        [server.rate_limit.default]
        max_attempts = 2
    "#};

    let server = TestServer::builder().build(config).await;

    // Rotating the header does not escape the limit; the peer address is used.
    assert_eq!(server.client.get_as("1.1.1.1", "/api/posts").await.status(), 404);
    assert_eq!(server.client.get_as("2.2.2.2", "/api/posts").await.status(), 404);
    assert_eq!(server.client.get_as("3.3.3.3", "/api/posts").await.status(), 429);
}

#[tokio::test]
async fn static_assets_are_skipped() {
    let server = TestServer::builder().build(TRUSTED).await;

    for path in ["/static/app.js", "/favicon.ico", "/robots.txt", "/assets/logo.png?v=3", "/main.css"] {
        for _ in 0..5 {
            let response = server.client.get_as("1.2.3.4", path).await;
            assert_eq!(response.status(), 404, "{path}");
            assert!(response.headers().get("x-ratelimit-limit").is_none(), "{path}");
        }
    }

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");
}

#[tokio::test]
async fn login_has_its_own_policy() {
    let server = TestServer::builder().with_upstream().build(TRUSTED).await;
    let credentials = json!({ "username": "ada", "password": "wrong" });

    for attempt in 1..=10 {
        let response = server.client.post_as("1.2.3.4", "/api/auth/login", &credentials).await;
        assert_eq!(response.status(), 200, "attempt {attempt}");
        assert_eq!(header(&response, "x-ratelimit-limit"), "10");
    }

    let response = server.client.post_as("1.2.3.4", "/api/auth/login", &credentials).await;
    assert_eq!(response.status(), 429);
    assert_eq!(header(&response, "retry-after"), "600");

    // The default policy is untouched by login attempts.
    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(response.status(), 200);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");
}

#[tokio::test]
async fn custom_message_and_path_policy() {
    let config = indoc! {r#"
        [server.rate_limit]
        message = "Slow down"
        trust_forwarded_headers = true

        [[server.rate_limit.paths]]
        prefix = "/api/search"
        max_attempts = 1
        block_minutes = 2
    "#};

    let server = TestServer::builder().build(config).await;

    assert_eq!(server.client.get_as("1.2.3.4", "/api/search?q=rust").await.status(), 404);

    let response = server.client.get_as("1.2.3.4", "/api/search?q=tokio").await;
    assert_eq!(response.status(), 429);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":429,"message":"Slow down","data":{"retry_after":120}}"#);
}

#[tokio::test]
async fn store_outage_fails_open() {
    let server = TestServer::builder()
        .with_upstream()
        .store(Arc::new(FailingStore))
        .build(TRUSTED)
        .await;

    for _ in 0..10 {
        let response = server.client.get_as("1.2.3.4", "/api/posts").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }

    assert_eq!(server.upstream().hits(), 10);
}

#[tokio::test]
async fn disabled_rate_limiting() {
    let config = indoc! {r#"
        [server.rate_limit]
        enabled = false

        [server.rate_limit.default]
        max_attempts = 1
    "#};

    let server = TestServer::builder().with_upstream().build(config).await;

    for _ in 0..5 {
        let response = server.client.get("/api/posts").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}
