//! Route handlers.
//!
//! A handler is the terminal link of a route's chain: it receives the
//! request with path parameters bound and returns an [`Outcome`]. Any
//! `Fn(Request) -> impl Future<Output = Outcome>` closure or `async fn` is a
//! handler.
//!
//! ```
//! use keystone_core::{Outcome, Request, Response};
//!
//! async fn get_job(request: Request) -> Outcome {
//!     let id = request.param("id").unwrap_or_default().to_string();
//!     Ok(Response::ok(serde_json::json!({ "id": id })))
//! }
//!
//! let mut router = keystone_server::Router::new();
//! router.get("/jobs/:id", get_job);
//! ```

use std::future::Future;
use std::sync::Arc;

use keystone_core::{Outcome, Request, StructuredError};
use keystone_middleware::BoxFuture;
use serde::de::DeserializeOwned;

/// The terminal link of a route.
pub trait Handler: Send + Sync + 'static {
    /// Handles the request.
    fn call(&self, request: Request) -> BoxFuture<'static, Outcome>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Outcome> {
        Box::pin(self(request))
    }
}

/// A shareable, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Deserializes the JSON body into `T`.
///
/// A missing body is treated as `null`. Shape mismatches become
/// validation errors.
pub fn parse_body<T: DeserializeOwned>(request: &Request) -> Result<T, StructuredError> {
    let body = request.body().cloned().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(body).map_err(StructuredError::from)
}
