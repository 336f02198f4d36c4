use std::sync::Arc;
use std::time::Duration;

use config::RedisConfig;
use integration_tests::TestServer;
use rate_limit::{DistributedLock, RateLimitStore, RedisStore};
use tokio::time::sleep;

const REDIS_URL: &str = "redis://localhost:6379/0";

fn key_prefix(test: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis();

    format!("quill_test_{test}_{timestamp}:")
}

fn redis_config(key_prefix: &str) -> String {
    indoc::formatdoc! {r#"
        [server.rate_limit]
        trust_forwarded_headers = true

        [server.rate_limit.default]
        max_attempts = 3
        decay_minutes = 1
        block_minutes = 1

        [server.rate_limit.storage]
        type = "redis"
        url = "{REDIS_URL}"
        key_prefix = "{key_prefix}"
    "#}
}

fn store(key_prefix: &str) -> Arc<RedisStore> {
    let config = RedisConfig {
        url: REDIS_URL.to_string(),
        key_prefix: key_prefix.to_string(),
        ..Default::default()
    };

    Arc::new(RedisStore::new(&config).unwrap())
}

fn header(response: &reqwest::Response, name: &str) -> String {
    response.headers()[name].to_str().unwrap().to_string()
}

#[tokio::test]
async fn redis_counts_down_then_blocks() {
    let server = TestServer::builder().build(&redis_config(&key_prefix("countdown"))).await;

    let mut remaining = Vec::new();

    for _ in 0..3 {
        let response = server.client.get_as("1.2.3.4", "/api/posts").await;
        assert_eq!(response.status(), 404);
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
    assert_eq!(header(&response, "retry-after"), "60");
}

#[tokio::test]
async fn redis_retry_after_counts_down() {
    let server = TestServer::builder().build(&redis_config(&key_prefix("retry_after"))).await;

    for _ in 0..3 {
        server.client.get_as("1.2.3.4", "/api/posts").await;
    }

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(header(&response, "retry-after"), "60");

    sleep(Duration::from_millis(2100)).await;

    let response = server.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(response.status(), 429);

    let retry_after: u64 = header(&response, "retry-after").parse().unwrap();
    assert!((1..60).contains(&retry_after), "retry after {retry_after}");
}

#[tokio::test]
async fn redis_origins_are_isolated() {
    let server = TestServer::builder().build(&redis_config(&key_prefix("isolation"))).await;

    for _ in 0..3 {
        server.client.get_as("1.2.3.4", "/api/posts").await;
    }

    assert_eq!(server.client.get_as("1.2.3.4", "/api/posts").await.status(), 429);

    let response = server.client.get_as("5.6.7.8", "/api/posts").await;
    assert_eq!(response.status(), 404);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");

    let response = server.client.get_as("1.2.3.4", "/api/comments").await;
    assert_eq!(response.status(), 404);
    assert_eq!(header(&response, "x-ratelimit-remaining"), "2");
}

#[tokio::test]
async fn instances_share_one_limit() {
    let config = redis_config(&key_prefix("shared"));

    let first = TestServer::builder().build(&config).await;
    let second = TestServer::builder().build(&config).await;

    assert_eq!(first.client.get_as("1.2.3.4", "/api/posts").await.status(), 404);
    assert_eq!(second.client.get_as("1.2.3.4", "/api/posts").await.status(), 404);

    let response = first.client.get_as("1.2.3.4", "/api/posts").await;
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");

    assert_eq!(second.client.get_as("1.2.3.4", "/api/posts").await.status(), 429);
    assert_eq!(first.client.get_as("1.2.3.4", "/api/posts").await.status(), 429);
}

#[tokio::test]
async fn redis_store_commands() {
    let store = store(&key_prefix("commands"));
    let ttl = Duration::from_secs(60);

    assert_eq!(store.get("counter").await.unwrap(), None);
    assert_eq!(store.ttl("counter").await.unwrap(), -2);

    assert_eq!(store.incr_with_expiry("counter", ttl).await.unwrap(), 1);
    assert_eq!(store.incr_with_expiry("counter", ttl).await.unwrap(), 2);
    assert_eq!(store.get("counter").await.unwrap(), Some(2));

    let remaining = store.ttl("counter").await.unwrap();
    assert!((59..=60).contains(&remaining), "ttl {remaining}");

    assert!(store.set_nx_ex("flag", "1", ttl).await.unwrap());
    assert!(!store.set_nx_ex("flag", "1", ttl).await.unwrap());
    assert!(store.exists("flag").await.unwrap());
    assert!(!store.exists("missing").await.unwrap());

    assert!(!store.delete_if_equals("flag", "2").await.unwrap());
    assert!(store.delete_if_equals("flag", "1").await.unwrap());
    assert!(!store.exists("flag").await.unwrap());

    store.ping().await.unwrap();
}

#[tokio::test]
async fn redis_stale_lock_guard_does_not_release_new_holder() {
    let lock = DistributedLock::new(store(&key_prefix("lock")), Duration::from_secs(1)).unwrap();

    let stale = lock.try_acquire("job").await.unwrap().unwrap();
    assert!(lock.try_acquire("job").await.unwrap().is_none());

    sleep(Duration::from_millis(1500)).await;

    let current = lock.try_acquire("job").await.unwrap().unwrap();
    assert_ne!(stale.token(), current.token());

    assert!(!lock.release(stale).await.unwrap());
    assert!(lock.try_acquire("job").await.unwrap().is_none());
    assert!(lock.release(current).await.unwrap());
}
