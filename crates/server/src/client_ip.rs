//! Client address extraction.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use http::Request;

/// Extract client IP address from request.
///
/// Forwarding headers are only consulted when the deployment sits behind a
/// proxy that sets them; otherwise a client could pick its own rate limit key.
pub(crate) fn client_ip<B>(req: &Request<B>, trust_forwarded_headers: bool) -> Option<IpAddr> {
    if trust_forwarded_headers && let Some(ip) = forwarded_ip(req) {
        return Some(ip);
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}

fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    // The first entry of X-Forwarded-For is the original client.
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        let first = forwarded_for.to_str().ok()?.split(',').next()?;

        if let Ok(ip) = first.trim().parse() {
            return Some(ip);
        }
    }

    req.headers().get("x-real-ip")?.to_str().ok()?.trim().parse().ok()
}
