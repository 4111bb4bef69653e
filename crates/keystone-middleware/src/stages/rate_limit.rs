//! Rate limiting stage.
//!
//! Rejections are answered directly with a `429` response rather than an
//! `Err`, so the hot rejection path never goes through error handling.
//! Every response carries the informational headers:
//!
//! | Header | Value |
//! |--------|-------|
//! | `X-RateLimit-Limit` | attempts per window |
//! | `X-RateLimit-Remaining` | attempts left |
//! | `X-RateLimit-Reset` | RFC 3339 timestamp of window end or block end |
//! | `Retry-After` | seconds, on rejection only |

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use keystone_core::{Outcome, Request, Response, StructuredError};
use keystone_telemetry::metrics;

use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::middleware::{BoxFuture, Middleware, Next};

/// Rate limit header names.
pub mod headers {
    /// Attempts allowed per window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Attempts left in the window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// When the window or block ends.
    pub const RESET: &str = "x-ratelimit-reset";
}

/// Default rejection message.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later";

/// Applies a [`RateLimiter`] to every request.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    message: String,
}

impl RateLimitMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    /// Overrides the rejection message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The wrapped limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn reject(&self, decision: &RateLimitDecision) -> Response {
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        let error = StructuredError::rate_limit(&self.message, retry_after, Some(decision.limit));

        let mut response = Response::from_error(&error, false);
        let meta = response.meta_mut();
        meta.timestamp = Some(Utc::now());
        meta.retry_after = Some(retry_after);

        let map = response.headers_mut();
        set_headers(map, decision);
        map.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}

fn set_headers(map: &mut HeaderMap, decision: &RateLimitDecision) {
    map.insert(
        HeaderName::from_static(headers::LIMIT),
        HeaderValue::from(decision.limit),
    );
    map.insert(
        HeaderName::from_static(headers::REMAINING),
        HeaderValue::from(decision.remaining),
    );
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        map.insert(HeaderName::from_static(headers::RESET), value);
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let key = self.limiter.key_for(&request);
            let decision = self.limiter.check_key_at(&key, Utc::now());

            if !decision.allowed {
                tracing::warn!(
                    rate_limit.limiter = self.limiter.name(),
                    rate_limit.key = %key,
                    retry_after = decision.retry_after_secs,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limit_rejection(self.limiter.name());
                return Ok(self.reject(&decision));
            }

            match next.run(request).await {
                Ok(mut response) => {
                    set_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                Err(mut error) => {
                    set_headers(error.headers_mut(), &decision);
                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{KeyBuilder, RateLimitPolicy};
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn stage(max: u32) -> RateLimitMiddleware {
        RateLimitMiddleware::new(Arc::new(RateLimiter::new(
            "login",
            RateLimitPolicy::new(Duration::from_secs(60), max, Duration::from_secs(120)),
            KeyBuilder::IpAndBodyField("email".into()),
        )))
    }

    fn login(email: &str) -> Request {
        Request::new(Method::POST, "/auth/login")
            .with_ip("10.0.0.1")
            .with_body(serde_json::json!({ "email": email }))
    }

    fn counted<'a>(hits: &Arc<AtomicUsize>) -> Next<'a> {
        let hits = Arc::clone(hits);
        Next::terminal(move |_req| {
            Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Response::ok(serde_json::json!({ "token": "t" })))
            })
        })
    }

    #[tokio::test]
    async fn test_allowed_sets_informational_headers() {
        let mw = stage(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let response = Next::new(&mw, counted(&hits))
            .run(login("a@x.io"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header(headers::LIMIT), Some("2"));
        assert_eq!(response.header(headers::REMAINING), Some("1"));
        assert!(response.header(headers::RESET).is_some());
        assert!(response.header("retry-after").is_none());
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_informational_headers() {
        let mw = stage(3);
        let terminal = Next::terminal(|_req| {
            Box::pin(async { Err(StructuredError::not_found_resource("Job", "9")) })
        });
        let error = Next::new(&mw, terminal)
            .run(login("a@x.io"))
            .await
            .unwrap_err();

        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.headers()[headers::LIMIT], "3");
        assert_eq!(error.headers()[headers::REMAINING], "2");
        assert!(error.headers().contains_key(headers::RESET));

        let rendered = Response::from_error(&error, false);
        assert_eq!(rendered.header(headers::LIMIT), Some("3"));
    }

    #[tokio::test]
    async fn test_rejection_is_direct_429() {
        let mw = stage(2);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            Next::new(&mw, counted(&hits)).run(login("a@x.io")).await.unwrap();
        }

        let response = Next::new(&mw, counted(&hits))
            .run(login("A@X.io"))
            .await
            .expect("rejections are responses, not errors");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(response.header("retry-after"), Some("120"));
        assert_eq!(response.header(headers::REMAINING), Some("0"));

        let envelope = response.envelope();
        assert!(!envelope.success);
        let error = envelope.error.as_ref().unwrap();
        assert_eq!(error.code, "RATE_LIMIT_EXCEEDED");
        assert_eq!(error.message, DEFAULT_MESSAGE);
        assert_eq!(envelope.meta.as_ref().unwrap().retry_after, Some(120));
    }

    #[tokio::test]
    async fn test_different_email_is_separate_key() {
        let mw = stage(1);
        let hits = Arc::new(AtomicUsize::new(0));
        Next::new(&mw, counted(&hits)).run(login("a@x.io")).await.unwrap();
        let blocked = Next::new(&mw, counted(&hits)).run(login("a@x.io")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = Next::new(&mw, counted(&hits)).run(login("b@x.io")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_message() {
        let mw = stage(1).with_message("Too many login attempts");
        let hits = Arc::new(AtomicUsize::new(0));
        Next::new(&mw, counted(&hits)).run(login("a@x.io")).await.unwrap();
        let response = Next::new(&mw, counted(&hits))
            .run(login("a@x.io"))
            .await
            .unwrap();
        assert_eq!(
            response.envelope().error.as_ref().unwrap().message,
            "Too many login attempts"
        );
    }
}
