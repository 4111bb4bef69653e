//! # Keystone Server
//!
//! Route registration, dispatch and the HTTP transport for Keystone.
//!
//! - [`Router`] - ordered routes with global and per-route middleware
//! - [`Handler`] - the terminal link of a route
//! - [`App`] - router, aggregator and limiters built from [`KeystoneConfig`]
//! - [`Server`] - hyper HTTP/1 loop with graceful shutdown
//! - [`session::logout_handler`] - token revocation endpoint
//!
//! ## Request flow
//!
//! ```text
//! TCP -> hyper -> Router::handle -> Router::dispatch
//!                                      |
//!                       [global..., route...] -> handler
//! ```
//!
//! [`KeystoneConfig`]: keystone_config::KeystoneConfig

#![doc(html_root_url = "https://docs.rs/keystone-server/0.1.0")]

mod app;
mod error;
pub mod handler;
mod router;
mod server;
pub mod session;
mod shutdown;
pub mod transport;

pub use app::{App, Limiters};
pub use error::ServerError;
pub use handler::{parse_body, BoxedHandler, Handler};
pub use router::{RouteInfo, Router};
pub use server::Server;
pub use shutdown::{ConnectionGuard, ConnectionTracker, ShutdownSignal};
pub use transport::{InvalidBody, RemoteAddr};
