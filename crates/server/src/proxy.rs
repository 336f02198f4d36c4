//! Forwards admitted requests to the blog API.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use config::UpstreamConfig;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE},
};
use reqwest::Client;

use crate::response;

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

pub(crate) struct Upstream {
    client: Client,
    base: String,
    max_body_size: usize,
}

impl Upstream {
    pub(crate) fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for the upstream: {e}"))?;

        Ok(Self {
            client,
            base: config.url.as_str().trim_end_matches('/').to_string(),
            max_body_size: config.max_body_size,
        })
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        &CONNECTION,
        &KEEP_ALIVE,
        &PROXY_AUTHENTICATE,
        &PROXY_AUTHORIZATION,
        &TE,
        &TRAILER,
        &TRANSFER_ENCODING,
        &UPGRADE,
    ]
    .contains(&name)
}

fn request_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len() + 1);

    for (name, value) in headers {
        if is_hop_by_hop(name) || name == HOST || name == CONTENT_LENGTH {
            continue;
        }

        forwarded.append(name.clone(), value.clone());
    }

    if let Some(peer) = peer {
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {}", peer.ip()),
            None => peer.ip().to_string(),
        };

        if let Ok(value) = HeaderValue::from_str(&chain) {
            forwarded.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    forwarded
}

/// Router fallback: every path that is not the health endpoint ends up here.
pub(crate) async fn forward(State(upstream): State<Arc<Upstream>>, req: Request) -> Response<Body> {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    let (parts, body) = req.into_parts();

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{path_and_query}", upstream.base);

    let body = match axum::body::to_bytes(body, upstream.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            log::debug!("Rejected request body for {path_and_query}: {e}");
            return response::error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let result = upstream
        .client
        .request(parts.method, &url)
        .headers(request_headers(&parts.headers, peer))
        .body(body)
        .send()
        .await;

    let upstream_response = match result {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            log::warn!("Upstream timed out for {url}: {e}");
            return response::error(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out");
        }
        Err(e) => {
            log::warn!("Upstream request to {url} failed: {e}");
            return response::error(StatusCode::BAD_GATEWAY, "Upstream unavailable");
        }
    };

    let status = upstream_response.status();
    let headers = upstream_response.headers().clone();

    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) if e.is_timeout() => {
            log::warn!("Upstream timed out while sending the body for {url}: {e}");
            return response::error(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out");
        }
        Err(e) => {
            log::warn!("Failed to read upstream response for {url}: {e}");
            return response::error(StatusCode::BAD_GATEWAY, "Upstream unavailable");
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;

    for (name, value) in &headers {
        if is_hop_by_hop(name) || name == CONTENT_LENGTH {
            continue;
        }

        response.headers_mut().append(name.clone(), value.clone());
    }

    response
}

/// Fallback when no upstream is configured.
pub(crate) async fn not_found() -> Response<Body> {
    response::error(StatusCode::NOT_FOUND, "Not found")
}
