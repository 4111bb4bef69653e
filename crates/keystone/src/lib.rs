//! # Keystone
//!
//! The dispatch and resilience core of an HTTP API:
//!
//! - ordered routing with path parameters ([`router`], [`server::Router`])
//! - composable middleware with a single `Result` flowing back out ([`middleware`])
//! - one structured error model with fixed defaults per category ([`core`])
//! - in-memory error aggregation ([`telemetry`])
//! - window-and-block rate limiting ([`middleware::RateLimiter`])
//! - layered configuration ([`config`])
//!
//! ## Quick start
//!
//! ```no_run
//! use keystone::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     let mut app = App::load("keystone.toml")?;
//!     app.init_telemetry()?;
//!
//!     let login_limit = app.login_limit();
//!     app.router_mut()
//!         .get("/health", |_req: Request| async {
//!             Ok(Response::ok(serde_json::json!({ "status": "up" })))
//!         })
//!         .register(Method::POST, "/auth/login", vec![login_limit], |req: Request| async move {
//!             let email = req.body_str("email").unwrap_or_default().to_string();
//!             Ok(Response::ok(serde_json::json!({ "email": email })))
//!         });
//!
//!     app.into_server().run().await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone/0.1.0")]

pub use keystone_config as config;
pub use keystone_core as core;
pub use keystone_middleware as middleware;
pub use keystone_router as router;
pub use keystone_server as server;
pub use keystone_telemetry as telemetry;

/// Common imports.
pub mod prelude {
    pub use http::{Method, StatusCode};

    pub use keystone_config::{ConfigLoader, KeystoneConfig};
    pub use keystone_core::{
        ErrorCategory, ErrorDetails, FieldErrors, Outcome, Principal, Request, Response,
        Severity, StructuredError,
    };
    pub use keystone_middleware::{
        AuthMiddleware, Authenticator, BoxFuture, BoxedMiddleware, FnMiddleware, KeyBuilder,
        Middleware, Next, OptionalAuthMiddleware, RateLimitMiddleware, RateLimitPolicy,
        RateLimiter, RoleGuard, TimeoutMiddleware,
    };
    pub use keystone_server::{parse_body, App, Router, Server, ServerError, ShutdownSignal};
    pub use keystone_telemetry::ErrorAggregator;
}
