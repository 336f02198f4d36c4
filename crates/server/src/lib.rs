//! Quill server library.
//!
//! Provides a reusable server function to serve Quill either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod client_ip;
mod health;
mod proxy;
mod rate_limit;
mod response;

use std::{net::SocketAddr, sync::Arc};

use ::rate_limit::RateLimiter;
use anyhow::anyhow;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use proxy::Upstream;
use rate_limit::RateLimitLayer;
use tokio::net::TcpListener;

/// Configuration for serving Quill.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Quill TOML configuration.
    pub config: Config,
}

/// Builds the application router.
///
/// Requests pass the rate limit layer before reaching the upstream proxy. The
/// health endpoint is merged after the layer and is never counted.
pub fn router(config: &Config, limiter: Option<Arc<RateLimiter>>) -> anyhow::Result<Router> {
    let mut app = match &config.upstream {
        Some(upstream) => {
            let upstream = Arc::new(Upstream::new(upstream)?);
            Router::new().fallback(proxy::forward).with_state(upstream)
        }
        None => {
            log::warn!("No upstream configured, admitted requests will be answered with 404");
            Router::new().fallback(proxy::not_found)
        }
    };

    if let Some(limiter) = limiter.clone() {
        log::debug!("Applying HTTP rate limiting middleware");
        app = app.layer(RateLimitLayer::new(limiter));
    }

    if config.server.health.enabled && config.server.health.listen.is_none() {
        app = app.merge(health::router(&config.server.health.path, limiter));
    }

    Ok(app)
}

/// Creates the rate limiter the configuration asks for, if any.
pub async fn limiter(config: &Config) -> anyhow::Result<Option<Arc<RateLimiter>>> {
    if !config.server.rate_limit.enabled {
        log::debug!("Rate limiting disabled - no limiter created");
        return Ok(None);
    }

    log::debug!("Initializing rate limiter with configured policies");
    let limiter = RateLimiter::from_config(config.server.rate_limit.clone()).await?;

    Ok(Some(Arc::new(limiter)))
}

/// Starts and runs the Quill server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let limiter = limiter(&config).await?;
    let app = router(&config, limiter.clone())?;

    if config.server.health.enabled
        && let Some(listen) = config.server.health.listen
    {
        tokio::spawn(health::bind_health_endpoint(
            listen,
            config.server.tls.clone(),
            config.server.health.clone(),
            limiter,
        ));
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Quill listening at: https://{listen_address}");

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            log::info!("Quill listening at: http://{listen_address}");

            axum::serve(listener, service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {}", e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use config::{RateLimitConfig, RateLimitPolicy};
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn limited_config(max_attempts: u32) -> Config {
        let mut config = Config::default();

        config.server.rate_limit = RateLimitConfig {
            default: RateLimitPolicy {
                max_attempts,
                decay_minutes: 1,
                block_minutes: 5,
            },
            trust_forwarded_headers: true,
            ..Default::default()
        };

        config
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_never_limited() {
        let config = limited_config(1);
        let app = router(&config, limiter(&config).await.unwrap()).unwrap();

        for _ in 0..5 {
            let response = app.clone().oneshot(get("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn missing_upstream_answers_not_found_until_blocked() {
        let config = limited_config(2);
        let app = router(&config, limiter(&config).await.unwrap()).unwrap();

        let response = app.clone().oneshot(get("/api/posts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");

        let response = app.clone().oneshot(get("/api/posts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let response = app.oneshot(get("/api/posts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn disabled_rate_limiting_has_no_layer() {
        let mut config = limited_config(1);
        config.server.rate_limit.enabled = false;

        let limiter = limiter(&config).await.unwrap();
        assert!(limiter.is_none());

        let app = router(&config, limiter).unwrap();

        for _ in 0..3 {
            let response = app.clone().oneshot(get("/api/posts")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }
}
