//! # Keystone Test
//!
//! In-memory testing for Keystone routers. Requests are encoded to
//! `http` types and served by [`Router::handle`](keystone_server::Router::handle),
//! so no port is bound and every middleware stage runs.
//!
//! ```
//! use http::StatusCode;
//! use keystone_core::{Request, Response};
//! use keystone_server::Router;
//! use keystone_test::TestClient;
//!
//! # tokio_test::block_on(async {
//! let mut router = Router::new();
//! router.get("/health", |_req: Request| async {
//!     Ok(Response::ok(serde_json::json!({ "status": "up" })))
//! });
//!
//! let client = TestClient::new(router);
//! let response = client.get("/health").send().await;
//! response.assert_status(StatusCode::OK).assert_success();
//! assert_eq!(response.data().unwrap()["status"], "up");
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-test/0.1.0")]

mod client;
mod error;
mod response;

pub use client::{TestClient, TestRequest};
pub use error::TestError;
pub use response::TestResponse;
