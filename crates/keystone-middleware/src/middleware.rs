//! The middleware trait and its continuation.
//!
//! A middleware receives the request by value and a [`Next`] continuation.
//! It either calls `next.run(request)` exactly once, optionally rewriting the
//! returned [`Outcome`], or returns its own outcome without calling it
//! (short-circuit).
//!
//! # Example
//!
//! ```
//! use keystone_core::{Outcome, Request};
//! use keystone_middleware::{BoxFuture, Middleware, Next};
//!
//! struct Stamp;
//!
//! impl Middleware for Stamp {
//!     fn name(&self) -> &'static str {
//!         "stamp"
//!     }
//!
//!     fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
//!         Box::pin(async move {
//!             let mut response = next.run(request).await?;
//!             response.meta_mut().request_id = Some("stamped".into());
//!             Ok(response)
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use keystone_core::{Outcome, Request};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request interceptor.
///
/// Implementations must call `next.run` at most once. Calling it zero times
/// short-circuits the rest of the chain, including the handler.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and route introspection.
    fn name(&self) -> &'static str;

    /// Handles the request, delegating to `next` to continue the chain.
    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome>;
}

/// The end of a chain: usually the route handler.
pub type Terminal<'a> = Box<dyn FnOnce(Request) -> BoxFuture<'a, Outcome> + Send + 'a>;

/// The rest of the pipeline.
///
/// Consumed by [`Next::run`], so it can only be resumed once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Terminal(Terminal<'a>),
}

impl<'a> Next<'a> {
    /// Continuation that runs `middleware` and then `next`.
    #[must_use]
    pub fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Continuation that ends the chain by calling `f`.
    pub fn terminal<F>(f: F) -> Self
    where
        F: FnOnce(Request) -> BoxFuture<'a, Outcome> + Send + 'a,
    {
        Self {
            inner: NextInner::Terminal(Box::new(f)),
        }
    }

    /// Resumes the chain.
    pub async fn run(self, request: Request) -> Outcome {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(request, *next).await,
            NextInner::Terminal(f) => f(request).await,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NextInner::Chain { middleware, .. } => f
                .debug_struct("Next")
                .field("middleware", &middleware.name())
                .finish_non_exhaustive(),
            NextInner::Terminal(_) => f.write_str("Next(<terminal>)"),
        }
    }
}

/// A middleware built from a closure.
///
/// ```
/// use keystone_middleware::FnMiddleware;
///
/// let audit = FnMiddleware::new("audit", |request, next| {
///     Box::pin(async move {
///         tracing::info!(path = request.path(), "audit");
///         next.run(request).await
///     })
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
{
    /// Wraps `func` under `name`.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        (self.func)(request, next)
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
