use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use config::UpstreamConfig;
use rate_limit::{RateLimitStore, StorageError};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// A tiny blog API that counts how many requests reached it.
pub struct StubUpstream {
    address: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl StubUpstream {
    /// Start the stub on a free port.
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/api/posts", get(posts))
            .route("/api/auth/login", post(login))
            .route("/api/auth/register", post(register))
            .route("/api/echo/headers", get(echo_headers))
            .route("/api/slow", get(slow))
            .with_state(hits.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { address, hits, handle }
    }

    /// Upstream configuration pointing at this stub, with a short timeout.
    pub fn config(&self) -> UpstreamConfig {
        UpstreamConfig {
            url: format!("http://{}", self.address).parse().unwrap(),
            timeout: Duration::from_millis(500),
            max_body_size: 1024,
        }
    }

    /// Requests that made it past Quill.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "code": 200, "message": "ok", "data": data }))
}

async fn posts(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    envelope(json!([{ "id": 1, "title": "Hello" }]))
}

async fn login(State(hits): State<Arc<AtomicUsize>>, Json(body): Json<Value>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    envelope(json!({ "user": body["username"], "token": "t0k3n" }))
}

async fn register(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    envelope(json!({ "id": 42 }))
}

async fn echo_headers(State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    envelope(json!({ "x-forwarded-for": forwarded_for }))
}

async fn slow(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    envelope(Value::Null)
}

/// A store whose backend is always down.
pub struct FailingStore;

fn down() -> StorageError {
    StorageError::Connection("connection refused".to_string())
}

#[async_trait]
impl RateLimitStore for FailingStore {
    async fn get(&self, _: &str) -> Result<Option<i64>, StorageError> {
        Err(down())
    }

    async fn incr_with_expiry(&self, _: &str, _: Duration) -> Result<i64, StorageError> {
        Err(down())
    }

    async fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> Result<bool, StorageError> {
        Err(down())
    }

    async fn exists(&self, _: &str) -> Result<bool, StorageError> {
        Err(down())
    }

    async fn ttl(&self, _: &str) -> Result<i64, StorageError> {
        Err(down())
    }

    async fn delete_if_equals(&self, _: &str, _: &str) -> Result<bool, StorageError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(down())
    }
}
