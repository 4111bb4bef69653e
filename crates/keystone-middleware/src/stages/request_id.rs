//! Request id assignment.
//!
//! An inbound `X-Request-ID` is honoured when it parses as a UUID; anything
//! else is replaced by a freshly generated UUID v7. The id is stored on the
//! request and echoed in the response header, on both success and error
//! paths.

use http::header::{HeaderName, HeaderValue};
use keystone_core::{Outcome, Request, RequestId};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Header used to propagate request ids.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Returns the request's id, assigning one if it has none yet.
pub fn resolve_request_id(request: &mut Request) -> RequestId {
    if let Some(id) = request.request_id() {
        return id;
    }
    let id = request
        .header(REQUEST_ID_HEADER)
        .and_then(RequestId::parse)
        .unwrap_or_default();
    request.set_request_id(id);
    id
}

pub(crate) fn echo_request_id(headers: &mut http::HeaderMap, id: RequestId) {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

/// Assigns and echoes `X-Request-ID`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware;

impl RequestIdMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let id = resolve_request_id(&mut request);
            match next.run(request).await {
                Ok(mut response) => {
                    echo_request_id(response.headers_mut(), id);
                    Ok(response)
                }
                Err(error) => Err(error.with_context(
                    keystone_core::ContextPatch::new().request_id(id.to_string()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use keystone_core::{Response, StructuredError};

    fn echo_terminal<'a>() -> Next<'a> {
        Next::terminal(|req| {
            Box::pin(async move {
                let id = req.request_id().map(|id| id.to_string());
                Ok(Response::ok(serde_json::json!(id)))
            })
        })
    }

    #[tokio::test]
    async fn test_generates_id() {
        let mw = RequestIdMiddleware::new();
        let response = Next::new(&mw, echo_terminal())
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap();

        let header = response.header(REQUEST_ID_HEADER).unwrap().to_string();
        assert!(RequestId::parse(&header).is_some());
        assert_eq!(response.envelope().data, Some(serde_json::json!(header)));
    }

    #[tokio::test]
    async fn test_honours_inbound_uuid() {
        let inbound = "0191e5a4-7c1e-7b2a-9f00-0123456789ab";
        let req = Request::new(Method::GET, "/").with_header(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_static(inbound),
        );
        let mw = RequestIdMiddleware::new();
        let response = Next::new(&mw, echo_terminal()).run(req).await.unwrap();
        assert_eq!(response.header(REQUEST_ID_HEADER), Some(inbound));
    }

    #[tokio::test]
    async fn test_replaces_garbage_inbound() {
        let req = Request::new(Method::GET, "/").with_header(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_static("not-a-uuid"),
        );
        let mw = RequestIdMiddleware::new();
        let response = Next::new(&mw, echo_terminal()).run(req).await.unwrap();
        assert_ne!(response.header(REQUEST_ID_HEADER), Some("not-a-uuid"));
    }

    #[tokio::test]
    async fn test_error_gets_request_id_context() {
        let mw = RequestIdMiddleware::new();
        let terminal = Next::terminal(|_req| {
            Box::pin(async { Err(StructuredError::validation("bad")) })
        });
        let error = Next::new(&mw, terminal)
            .run(Request::new(Method::GET, "/"))
            .await
            .unwrap_err();
        assert!(error.context().request_id.is_some());
    }
}
