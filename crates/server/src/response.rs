//! The JSON envelope the blog API answers with.

use std::time::Duration;

use axum::{
    Json,
    body::Body,
    response::{IntoResponse, Response},
};
use http::{StatusCode, header::RETRY_AFTER};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct Envelope<T> {
    code: u16,
    message: String,
    data: T,
}

#[derive(Debug, Serialize)]
struct RetryAfter {
    retry_after: u64,
}

/// 429 with a retry hint in both the body and the `Retry-After` header.
pub(crate) fn too_many_requests(message: &str, retry_after: Duration) -> Response<Body> {
    let seconds = retry_after.as_secs();

    let envelope = Envelope {
        code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        message: message.to_string(),
        data: RetryAfter { retry_after: seconds },
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, seconds.to_string())],
        Json(envelope),
    )
        .into_response()
}

/// An error without payload, `data` is `null`.
pub(crate) fn error(status: StatusCode, message: &str) -> Response<Body> {
    let envelope = Envelope {
        code: status.as_u16(),
        message: message.to_string(),
        data: (),
    };

    (status, Json(envelope)).into_response()
}
