//! Test harness running Quill in front of a stub blog API.

mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use rate_limit::{RateLimitStore, RateLimiter};
use tokio::net::TcpListener;

pub use upstream::{FailingStore, StubUpstream};

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Start a request builder for the given method and path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Send a GET request on behalf of the given client address
    pub async fn get_as(&self, ip: &str, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path)
            .header("x-forwarded-for", ip)
            .send()
            .await
            .unwrap()
    }

    /// Send a POST request with a JSON body on behalf of the given client address
    pub async fn post_as(&self, ip: &str, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.request(reqwest::Method::POST, path)
            .header("x-forwarded-for", ip)
            .json(body)
            .send()
            .await
            .unwrap()
    }
}

/// Builder for [`TestServer`].
#[derive(Default)]
pub struct TestServerBuilder {
    store: Option<Arc<dyn RateLimitStore>>,
    upstream: bool,
}

impl TestServerBuilder {
    /// Count requests in this store instead of the configured one.
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Put the stub blog API behind Quill.
    pub fn with_upstream(mut self) -> Self {
        self.upstream = true;
        self
    }

    /// Start the server with the given TOML configuration
    pub async fn build(self, config_toml: &str) -> TestServer {
        let mut config: Config = toml::from_str(config_toml).unwrap();

        let upstream = if self.upstream {
            let upstream = StubUpstream::start().await;
            config.upstream = Some(upstream.config());
            Some(upstream)
        } else {
            None
        };

        let limiter = match self.store {
            Some(store) => Some(Arc::new(
                RateLimiter::new(config.server.rate_limit.clone(), store).unwrap(),
            )),
            None => server::limiter(&config).await.unwrap(),
        };

        let app = server::router(&config, limiter).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, service).await.unwrap();
        });

        TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            upstream,
            handle,
        }
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    upstream: Option<StubUpstream>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Create a builder for a test server
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// The stub blog API, if the server was built with one
    pub fn upstream(&self) -> &StubUpstream {
        self.upstream.as_ref().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start the real `server::serve` entry point on a free port and wait until it answers.
pub async fn serve(config_toml: &str) -> (TestClient, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let config: Config = toml::from_str(config_toml).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_address = listener.local_addr().unwrap();
    drop(listener);

    let handle = tokio::spawn(server::serve(server::ServeConfig { listen_address, config }));
    let client = TestClient::new(format!("http://{listen_address}"));

    for _ in 0..50 {
        if tokio::net::TcpStream::connect(listen_address).await.is_ok() {
            break;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    (client, handle)
}
