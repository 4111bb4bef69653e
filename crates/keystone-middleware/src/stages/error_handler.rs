//! The outermost stage: turns every `Err` into an error envelope.
//!
//! Register it first so it wraps everything else. On failure it:
//!
//! 1. merges request context (id, ip, url, method) into the error,
//! 2. records the error in the [`ErrorAggregator`],
//! 3. answers `{success: false, error, meta: {timestamp, requestId, retryAfter?}}`
//!    with the error's status, plus `Retry-After` for retryable errors that
//!    carry a hint.
//!
//! Successful responses pass through with `X-Request-ID` echoed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use http::header::{HeaderValue, RETRY_AFTER};
use keystone_core::{ContextPatch, Outcome, Request, Response, StructuredError};
use keystone_telemetry::ErrorAggregator;

use super::request_id::{echo_request_id, resolve_request_id};
use crate::limiter::client_ip;
use crate::middleware::{BoxFuture, Middleware, Next};

/// Catches, enriches, records and renders errors.
#[derive(Debug, Clone)]
pub struct ErrorHandlerMiddleware {
    aggregator: Arc<ErrorAggregator>,
    expose_internal: bool,
}

impl ErrorHandlerMiddleware {
    /// Creates the stage, recording into `aggregator`.
    ///
    /// Internal messages are masked by default.
    #[must_use]
    pub const fn new(aggregator: Arc<ErrorAggregator>) -> Self {
        Self {
            aggregator,
            expose_internal: false,
        }
    }

    /// Shows `system` error messages to clients instead of the generic text.
    #[must_use]
    pub const fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal = expose;
        self
    }

    /// The aggregator errors are recorded into.
    #[must_use]
    pub fn aggregator(&self) -> &Arc<ErrorAggregator> {
        &self.aggregator
    }

    /// Renders `error` as a response, after enriching and recording it.
    #[must_use]
    pub fn render(&self, error: &StructuredError, patch: ContextPatch) -> Response {
        let error = error.with_context(patch);
        self.aggregator.track(&error);

        let mut response = Response::from_error(&error, self.expose_internal);
        let meta = response.meta_mut();
        meta.timestamp = Some(Utc::now());
        meta.request_id.clone_from(&error.context().request_id);

        if error.is_retryable() {
            if let Some(secs) = error.retry_after_secs() {
                response.meta_mut().retry_after = Some(secs);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}

fn context_patch(request: &Request, request_id: String) -> ContextPatch {
    ContextPatch::new()
        .request_id(request_id)
        .ip(client_ip(request))
        .url(request.url())
        .method(request.method().as_str())
}

impl Middleware for ErrorHandlerMiddleware {
    fn name(&self) -> &'static str {
        "error_handler"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let started = Instant::now();
            let id = resolve_request_id(&mut request);
            let patch = context_patch(&request, id.to_string());
            let method = request.method().clone();
            let path = request.path().to_string();

            let mut response = match next.run(request).await {
                Ok(response) => response,
                Err(error) => self.render(&error, patch),
            };
            echo_request_id(response.headers_mut(), id);

            tracing::debug!(
                request_id = %id,
                http.method = %method,
                http.path = %path,
                http.status_code = response.status().as_u16(),
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Request completed"
            );
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnMiddleware;
    use http::{Method, StatusCode};
    use keystone_core::{ErrorCategory, Principal, Severity};

    fn failing<'a>(error: StructuredError) -> Next<'a> {
        Next::terminal(move |_req| Box::pin(async move { Err(error) }))
    }

    fn stage() -> ErrorHandlerMiddleware {
        ErrorHandlerMiddleware::new(Arc::new(ErrorAggregator::new()))
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let mw = stage();
        let terminal = Next::terminal(|_req| Box::pin(async { Ok(Response::ok(serde_json::json!(1))) }));
        let response = Next::new(&mw, terminal)
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.header("x-request-id").is_some());
        assert!(mw.aggregator().is_empty());
    }

    #[tokio::test]
    async fn test_error_becomes_envelope() {
        let mw = stage();
        let req = Request::new(Method::POST, "/jobs?draft=1").with_ip("10.1.1.1");
        let response = Next::new(&mw, failing(StructuredError::validation("title is required")))
            .run(req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope = response.envelope();
        assert!(!envelope.success);
        let error = envelope.error.as_ref().unwrap();
        assert_eq!(error.code, "VALIDATION_ERROR");
        assert_eq!(error.status_code, 400);

        let meta = envelope.meta.as_ref().unwrap();
        assert!(meta.timestamp.is_some());
        assert_eq!(meta.request_id.as_deref(), response.header("x-request-id"));
        assert!(meta.retry_after.is_none());
        assert!(response.header("retry-after").is_none());

        let entry = mw.aggregator().get("VALIDATION_ERROR", "title is required").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.category, ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_retryable_error_sets_retry_after() {
        let mw = stage();
        let response = Next::new(&mw, failing(StructuredError::storage("db down")))
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header("retry-after"), Some("5"));
        assert_eq!(response.envelope().meta.as_ref().unwrap().retry_after, Some(5));
    }

    #[tokio::test]
    async fn test_internal_message_masked_unless_exposed() {
        let masked = stage();
        let response = Next::new(&masked, failing(StructuredError::system("pool exhausted")))
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap();
        let error = response.envelope().error.clone().unwrap();
        assert_eq!(error.message, keystone_core::INTERNAL_MESSAGE);
        assert!(masked.aggregator().get("SYSTEM_ERROR", "pool exhausted").is_some());

        let exposed = stage().expose_internal_errors(true);
        let response = Next::new(&exposed, failing(StructuredError::system("pool exhausted")))
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.envelope().error.as_ref().unwrap().message, "pool exhausted");
    }

    #[tokio::test]
    async fn test_render_merges_context_without_losing_principal() {
        let mw = stage();
        let error = StructuredError::business_logic("course full")
            .with_context(ContextPatch::new().principal_id("u-1"));
        let req = Request::new(Method::POST, "/courses/9/enroll").with_ip("10.0.0.9");
        let patch = context_patch(&req, "rid".to_string());
        let response = mw.render(&error, patch);

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.context().request_id, None);
        let tracked = mw.aggregator().stats();
        assert_eq!(tracked.total, 1);
        assert_eq!(tracked.by_severity.get(&Severity::Medium), Some(&1));
    }

    #[tokio::test]
    async fn test_wraps_inner_middleware_failures() {
        let mw = stage();
        let deny = FnMiddleware::new("deny", |_req, _next| {
            Box::pin(async { Err(StructuredError::authorization("forbidden")) })
        });
        let mut req = Request::new(Method::DELETE, "/users/1");
        req.set_principal(Principal::new("u-2", "b@x.io", "student"));

        let terminal = Next::terminal(|_req| Box::pin(async { Ok(Response::ok(serde_json::Value::Null)) }));
        let response = Next::new(&mw, Next::new(&deny, terminal)).run(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
