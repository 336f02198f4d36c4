//! Rate limiting middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use rate_limit::{Decision, Quota, RateLimitRequest, RateLimiter};
use tower::Layer;

use crate::{client_ip::client_ip, response};

static LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Clone)]
pub struct RateLimitLayer(Arc<RateLimiter>);

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self(limiter)
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            limiter: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    limiter: Arc<RateLimiter>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep the driven instance for this call.
        let clone = self.next.clone();
        let mut next = std::mem::replace(&mut self.next, clone);
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let mut builder = RateLimitRequest::builder()
                .method(req.method().as_str())
                .path(req.uri().path());

            if let Some(ip) = client_ip(&req, limiter.config().trust_forwarded_headers) {
                builder = builder.ip(ip);
            }

            let rate_limit_request = builder.build();

            match limiter.admit(&rate_limit_request).await {
                Decision::Blocked { retry_after } => {
                    log::debug!(
                        "Request {} {} from {} rejected, retry after {}s",
                        rate_limit_request.method,
                        rate_limit_request.path,
                        rate_limit_request.ip,
                        retry_after.as_secs()
                    );

                    Ok(response::too_many_requests(&limiter.config().message, retry_after))
                }
                Decision::Allow(quota) => {
                    let mut response = next.call(req).await?;

                    if let Some(quota) = quota {
                        insert_quota_headers(response.headers_mut(), quota);
                    }

                    Ok(response)
                }
            }
        })
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: Quota) {
    headers.insert(LIMIT.clone(), HeaderValue::from(quota.limit));
    headers.insert(REMAINING.clone(), HeaderValue::from(quota.remaining));
    headers.insert(RESET.clone(), HeaderValue::from(quota.reset));
}
