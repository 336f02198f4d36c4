use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Json, Router, extract::State, routing::get};
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;
use rate_limit::RateLimiter;

#[derive(Debug, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// The server is operational and the counter store answers.
    Healthy,

    /// The server is operational but requests pass unlimited until the store recovers.
    Degraded { storage: &'static str },
}

/// Health is reported with 200 either way; a degraded store never takes the service down.
pub(crate) async fn health(State(limiter): State<Option<Arc<RateLimiter>>>) -> (StatusCode, Json<HealthState>) {
    let Some(limiter) = limiter else {
        return (StatusCode::OK, Json(HealthState::Healthy));
    };

    match limiter.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthState::Healthy)),
        Err(e) => {
            log::warn!("Rate limit storage is unreachable: {e}");
            (StatusCode::OK, Json(HealthState::Degraded { storage: "unreachable" }))
        }
    }
}

pub(crate) fn router(path: &str, limiter: Option<Arc<RateLimiter>>) -> Router {
    Router::new().route(path, get(health)).with_state(limiter)
}

/// Binds the health check endpoint to the specified address and configuration.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
    limiter: Option<Arc<RateLimiter>>,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let path = &health_config.path;
    let app = router(path, limiter).into_make_service();

    log::info!("Health check endpoint exposed at {scheme}://{addr}{path}");

    match tls_config {
        Some(tls) => {
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {}", e))?;

            axum_server::bind_rustls(addr, rustls_config)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
