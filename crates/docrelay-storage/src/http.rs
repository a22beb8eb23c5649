//! Mapping of HTTP transport failures and status codes onto [`AppError`].
//!
//! The resulting [`ErrorKind`] decides whether a job is retried, so the
//! mapping is shared by every client in this crate.

use reqwest::{Response, StatusCode};

use docrelay_core::error::{AppError, ErrorKind};
use docrelay_core::result::AppResult;

/// Longest response body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 512;

/// Classify a non-success status code.
pub fn status_kind(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimit,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Timeout,
        StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
        StatusCode::FORBIDDEN => ErrorKind::Authorization,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        s if s.is_server_error() => ErrorKind::ServiceUnavailable,
        _ => ErrorKind::Validation,
    }
}

/// Reasons Drive reports on a 403 when a usage quota, not a permission,
/// rejected the request.
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

/// Whether a Google API error body reports a usage limit.
///
/// The body looks like
/// `{"error": {"errors": [{"domain": "usageLimits", "reason": "..."}]}}`.
pub fn is_rate_limit_body(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value
        .pointer("/error/errors")
        .and_then(|errors| errors.as_array())
        .is_some_and(|errors| {
            errors.iter().any(|e| {
                let field = |name: &str| e.get(name).and_then(|v| v.as_str());
                field("domain") == Some("usageLimits")
                    || field("reason").is_some_and(|r| RATE_LIMIT_REASONS.contains(&r))
            })
        })
}

/// Classify a non-success response from its status and body.
pub fn response_kind(status: StatusCode, body: &str) -> ErrorKind {
    if status == StatusCode::FORBIDDEN && is_rate_limit_body(body) {
        return ErrorKind::RateLimit;
    }
    status_kind(status)
}

/// Convert a transport-level `reqwest` error.
pub fn map_reqwest_error(context: &str, err: reqwest::Error) -> AppError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() {
        ErrorKind::Serialization
    } else if err.is_builder() {
        ErrorKind::Internal
    } else {
        ErrorKind::ExternalService
    };
    AppError::with_source(kind, format!("{context}: {err}"), err)
}

/// Pass a successful response through, turn any other into an error that
/// carries the status and an excerpt of the body.
pub async fn check_response(context: &str, response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
    Err(AppError::new(
        response_kind(status, &body),
        format!("{context}: HTTP {status}: {excerpt}"),
    ))
}
