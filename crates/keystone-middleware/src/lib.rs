//! # Keystone Middleware
//!
//! Continuation-passing middleware for the Keystone dispatch layer.
//!
//! ```text
//! Request → error_handler → timeout → rate_limit → auth → … → handler
//!                                                               ↓
//! Outcome ← error_handler ← timeout ← rate_limit ← auth ← … ←───┘
//! ```
//!
//! Every step returns an [`Outcome`](keystone_core::Outcome). A middleware
//! either calls [`Next::run`] once and may rewrite what comes back, or
//! returns its own outcome without calling it.
//!
//! - [`Middleware`], [`Next`], [`FnMiddleware`] - the interceptor contract
//! - [`compose`], [`Pipeline`] - ordered composition
//! - [`RateLimiter`] - keyed attempt counting with a blocking penalty
//! - [`stages`] - error handling, request ids, auth, rate limiting, timeouts

#![doc(html_root_url = "https://docs.rs/keystone-middleware/0.1.0")]

pub mod limiter;
mod middleware;
pub mod pipeline;
pub mod stages;

pub use limiter::{client_ip, KeyBuilder, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next, Terminal};
pub use pipeline::{compose, BoxedMiddleware, Pipeline};
pub use stages::{
    AuthMiddleware, Authenticator, ErrorHandlerMiddleware, OptionalAuthMiddleware,
    RateLimitMiddleware, RequestIdMiddleware, RoleGuard, TimeoutMiddleware,
};
