//! Built-in stages.
//!
//! A typical global order is:
//!
//! 1. [`error_handler`] - outermost, converts every `Err` into an envelope
//! 2. [`timeout`] - per-request deadline
//! 3. [`rate_limit`] - the `api` limiter
//!
//! with [`auth`] stages and route-specific limiters attached per route.
//! [`request_id`] is only needed when the error handler is not installed.

pub mod auth;
pub mod error_handler;
pub mod rate_limit;
pub mod request_id;
pub mod timeout;

pub use auth::{AuthMiddleware, Authenticator, OptionalAuthMiddleware, RoleGuard};
pub use error_handler::ErrorHandlerMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use request_id::{resolve_request_id, RequestIdMiddleware, REQUEST_ID_HEADER};
pub use timeout::TimeoutMiddleware;
