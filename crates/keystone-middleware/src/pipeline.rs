//! Middleware composition.
//!
//! `compose([m1, m2, m3], terminal)` builds `m1 -> m2 -> m3 -> terminal`.
//! Within one request each middleware's "before" code runs before every
//! downstream middleware, and its "after" code runs after all of them:
//!
//! ```text
//! m1 before -> m2 before -> m3 before -> terminal -> m3 after -> m2 after -> m1 after
//! ```

use std::sync::Arc;

use keystone_core::{Outcome, Request};

use crate::middleware::{BoxFuture, Middleware, Next};

/// A shareable, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Chains `middlewares` in order in front of `terminal`.
///
/// Accepts any double-ended iterator so a router can chain global and
/// route-specific lists without allocating.
pub fn compose<'a, I>(middlewares: I, terminal: Next<'a>) -> Next<'a>
where
    I: IntoIterator<Item = &'a BoxedMiddleware>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |next, middleware| Next::new(middleware.as_ref(), next))
}

/// An ordered list of middleware.
///
/// # Example
///
/// ```ignore
/// use keystone_middleware::{FnMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new().with(FnMiddleware::new("noop", |req, next| {
///     Box::pin(next.run(req))
/// }));
///
/// let outcome = pipeline
///     .run(request, |_req| Box::pin(async { Ok(Response::ok(json!("hi"))) }))
///     .await;
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    #[must_use]
    pub fn with<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    pub fn push(&mut self, middleware: BoxedMiddleware) {
        self.stages.push(middleware);
    }

    /// Stages in order.
    #[must_use]
    pub fn stages(&self) -> &[BoxedMiddleware] {
        &self.stages
    }

    /// Stage names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `request` through every stage and then `terminal`.
    pub async fn run<'a, F>(&'a self, request: Request, terminal: F) -> Outcome
    where
        F: FnOnce(Request) -> BoxFuture<'a, Outcome> + Send + 'a,
    {
        compose(&self.stages, Next::terminal(terminal))
            .run(request)
            .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.names())
            .finish()
    }
}
