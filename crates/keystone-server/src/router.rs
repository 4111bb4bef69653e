//! Route registration and dispatch.
//!
//! The [`Router`] owns an ordered [`RouteTable`] of handlers plus a list of
//! global middleware. Dispatch finds the first route matching the method and
//! path, binds its parameters onto the request, and runs
//! `[...global, ...route]` around the handler.

use std::fmt;
use std::sync::Arc;

use http::Method;
use keystone_core::{Outcome, Request, StructuredError};
use keystone_middleware::{compose, BoxedMiddleware, Middleware, Next};
use keystone_router::RouteTable;

use crate::handler::{BoxedHandler, Handler};
use crate::transport::InvalidBody;

/// A registered route's handler and its route-specific stages.
struct Route {
    handler: BoxedHandler,
    middlewares: Vec<BoxedMiddleware>,
}

/// Read-only description of one registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// HTTP method.
    pub method: Method,
    /// Pattern as registered, e.g. `/jobs/:id`.
    pub pattern: String,
    /// Route-specific middleware names in execution order.
    pub middleware_names: Vec<&'static str>,
}

/// Ordered router with global and per-route middleware.
///
/// Registration order is significant: when two patterns match the same path
/// the one registered first wins, and global middleware always runs before
/// route middleware.
///
/// # Example
///
/// ```
/// use http::{Method, StatusCode};
/// use keystone_core::{Request, Response};
/// use keystone_server::Router;
///
/// # tokio_test::block_on(async {
/// let mut router = Router::new();
/// router.get("/jobs/:id", |req: Request| async move {
///     let id = req.param("id").unwrap_or_default().to_string();
///     Ok(Response::ok(serde_json::json!({ "id": id })))
/// });
///
/// let response = router.dispatch(Request::new(Method::GET, "/jobs/42")).await.unwrap();
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.envelope().data, Some(serde_json::json!({ "id": "42" })));
/// # });
/// ```
#[derive(Default)]
pub struct Router {
    table: RouteTable<Route>,
    global: Vec<BoxedMiddleware>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a global middleware.
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.global.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared global middleware.
    pub fn use_shared(&mut self, middleware: BoxedMiddleware) -> &mut Self {
        self.global.push(middleware);
        self
    }

    /// Registers a route.
    ///
    /// The pattern is split on `/`; segments starting with `:` bind
    /// parameters. Duplicates are kept and shadowed by earlier entries.
    pub fn register<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        middlewares: Vec<BoxedMiddleware>,
        handler: H,
    ) -> &mut Self {
        let index = self.table.insert(
            method.clone(),
            pattern,
            Route {
                handler: Arc::new(handler),
                middlewares,
            },
        );
        tracing::debug!(http.method = %method, pattern, index, "Route registered");
        self
    }

    /// Registers a `GET` route without route middleware.
    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.register(Method::GET, pattern, Vec::new(), handler)
    }

    /// Registers a `POST` route without route middleware.
    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.register(Method::POST, pattern, Vec::new(), handler)
    }

    /// Registers a `PUT` route without route middleware.
    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.register(Method::PUT, pattern, Vec::new(), handler)
    }

    /// Registers a `PATCH` route without route middleware.
    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.register(Method::PATCH, pattern, Vec::new(), handler)
    }

    /// Registers a `DELETE` route without route middleware.
    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.register(Method::DELETE, pattern, Vec::new(), handler)
    }

    /// Snapshot of registered routes in registration order.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.table
            .iter()
            .map(|entry| RouteInfo {
                method: entry.method().clone(),
                pattern: entry.pattern().as_str().to_string(),
                middleware_names: entry.value().middlewares.iter().map(|m| m.name()).collect(),
            })
            .collect()
    }

    /// Names of the global middleware in execution order.
    #[must_use]
    pub fn global_middleware_names(&self) -> Vec<&'static str> {
        self.global.iter().map(|m| m.name()).collect()
    }

    /// Removes every route and global middleware.
    pub fn clear(&mut self) {
        self.table.clear();
        self.global.clear();
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Routes a request through its middleware chain and handler.
    ///
    /// Unmatched requests and requests carrying an [`InvalidBody`] still pass
    /// through the global middleware, so an error-handling stage renders the
    /// failure. Without one the error is returned to the caller.
    pub async fn dispatch(&self, mut request: Request) -> Outcome {
        if let Some(InvalidBody(error)) = request.extensions_mut().remove::<InvalidBody>() {
            tracing::debug!(
                http.method = %request.method(),
                http.path = request.path(),
                error.message = error.message(),
                "Rejecting malformed body"
            );
            return self.fail_globally(request, error).await;
        }

        let found = self.table.find(request.method(), request.path());

        let Some(found) = found else {
            let message = format!("Route {} {} not found", request.method(), request.path());
            tracing::debug!(
                http.method = %request.method(),
                http.path = request.path(),
                other_method = self.table.matches_any_method(request.path()),
                "No route matched"
            );
            return self
                .fail_globally(request, StructuredError::not_found(message))
                .await;
        };

        request.set_params(found.params);
        let route = found.entry.value();
        let terminal = Next::terminal(move |req| route.handler.call(req));
        compose(self.global.iter().chain(&route.middlewares), terminal)
            .run(request)
            .await
    }

    async fn fail_globally(&self, request: Request, error: StructuredError) -> Outcome {
        let terminal = Next::terminal(move |_req| Box::pin(async move { Err(error) }));
        compose(&self.global, terminal).run(request).await
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("global", &self.global_middleware_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use keystone_core::{ErrorCategory, Response};
    use keystone_middleware::FnMiddleware;

    fn ok(tag: &'static str) -> impl Handler {
        move |_req: Request| async move { Ok(Response::ok(serde_json::json!(tag))) }
    }

    fn tagged(name: &'static str) -> BoxedMiddleware {
        Arc::new(FnMiddleware::new(name, |req, next| Box::pin(next.run(req))))
    }

    #[tokio::test]
    async fn test_binds_params_and_strips_query() {
        let mut router = Router::new();
        router.get("/users/:user/courses/:course", |req: Request| async move {
            let body = serde_json::json!({
                "user": req.param("user"),
                "course": req.param("course"),
            });
            Ok(Response::ok(body))
        });

        let response = router
            .dispatch(Request::new(Method::GET, "/users/u1/courses/c9?x=1"))
            .await
            .unwrap();
        assert_eq!(
            response.envelope().data,
            Some(serde_json::json!({ "user": "u1", "course": "c9" }))
        );
    }

    #[tokio::test]
    async fn test_method_must_match() {
        let mut router = Router::new();
        router.post("/jobs", ok("create"));

        let err = router
            .dispatch(Request::new(Method::GET, "/jobs"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.message().contains("GET"));
        assert!(err.message().contains("/jobs"));
    }

    #[tokio::test]
    async fn test_first_registered_wins() {
        let mut router = Router::new();
        router.get("/users/:id", ok("by-id"));
        router.get("/users/me", ok("me"));

        let response = router
            .dispatch(Request::new(Method::GET, "/users/me"))
            .await
            .unwrap();
        assert_eq!(response.envelope().data, Some(serde_json::json!("by-id")));
    }

    #[test]
    fn test_routes_snapshot() {
        let mut router = Router::new();
        router.use_shared(tagged("global"));
        router.register(Method::POST, "/auth/login", vec![tagged("login_limit")], ok("login"));
        router.get("/health", ok("up"));

        let routes = router.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].method, Method::POST);
        assert_eq!(routes[0].pattern, "/auth/login");
        assert_eq!(routes[0].middleware_names, ["login_limit"]);
        assert!(routes[1].middleware_names.is_empty());
        assert_eq!(router.global_middleware_names(), ["global"]);
    }

    #[test]
    fn test_clear() {
        let mut router = Router::new();
        router.use_shared(tagged("global")).get("/a", ok("a"));
        assert_eq!(router.len(), 1);

        router.clear();
        assert!(router.is_empty());
        assert!(router.global_middleware_names().is_empty());
    }
}
