//! Per-request deadline.
//!
//! The rest of the chain is raced against a timer. When the timer wins, the
//! downstream future is dropped: work it was doing is cancelled at its next
//! `.await`, while tasks it already spawned keep running.

use std::time::Duration;

use keystone_core::{ContextPatch, Outcome, Request, StructuredError};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Fails requests that take longer than a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl TimeoutMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// The deadline.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.path().to_string();

            if let Ok(outcome) = tokio::time::timeout(self.duration, next.run(request)).await {
                outcome
            } else {
                tracing::warn!(
                    http.method = %method,
                    http.path = %path,
                    timeout_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
                    "Request timed out"
                );
                let error = StructuredError::timeout(format!(
                    "Request timed out after {}ms",
                    self.duration.as_millis()
                ));
                Err(error.with_context(
                    ContextPatch::new()
                        .method(method.as_str())
                        .url(path),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use keystone_core::{ErrorCategory, Response};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_passes() {
        let mw = TimeoutMiddleware::new(Duration::from_millis(100));
        let terminal = Next::terminal(|_req| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Response::ok(serde_json::json!("done")))
            })
        });
        let outcome = Next::new(&mw, terminal).run(Request::new(Method::GET, "/")).await;
        assert_eq!(outcome.unwrap().envelope().data, Some(serde_json::json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_and_is_dropped() {
        let mw = TimeoutMiddleware::new(Duration::from_millis(50));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let terminal = Next::terminal(move |_req| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(Response::ok(serde_json::Value::Null))
            })
        });

        let error = Next::new(&mw, terminal)
            .run(Request::new(Method::GET, "/reports/ttqs"))
            .await
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::Network);
        assert_eq!(error.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(error.code(), "TIMEOUT");
        assert!(error.is_retryable());
        assert_eq!(error.message(), "Request timed out after 50ms");
        assert_eq!(error.context().method.as_deref(), Some("GET"));
        assert_eq!(error.context().url.as_deref(), Some("/reports/ttqs"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_message_is_shared_across_paths() {
        let mw = TimeoutMiddleware::new(Duration::from_millis(20));
        let mut messages = Vec::new();
        for path in ["/reports/1", "/reports/2?full=true"] {
            let terminal = Next::terminal(|_req| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Response::ok(serde_json::Value::Null))
                })
            });
            let error = Next::new(&mw, terminal)
                .run(Request::new(Method::GET, path))
                .await
                .unwrap_err();
            messages.push(error.message().to_string());
        }
        assert_eq!(messages[0], messages[1]);
    }
}
