//! Session endpoints.

use std::sync::Arc;

use keystone_core::{Request, Response};
use keystone_middleware::Authenticator;

use crate::handler::Handler;

/// Message returned by [`logout_handler`].
pub const LOGGED_OUT: &str = "Logged out successfully";

/// Handler that revokes the caller's bearer token.
///
/// Revocation failures are logged at `warn` and otherwise ignored: the client
/// is told it is logged out either way, and a request without a token is
/// treated the same.
pub fn logout_handler(authenticator: Arc<dyn Authenticator>) -> impl Handler {
    move |request: Request| {
        let authenticator = Arc::clone(&authenticator);
        async move {
            if let Some(token) = request.bearer_token() {
                if let Err(err) = authenticator.revoke(token).await {
                    tracing::warn!(
                        principal_id = request.principal().map(|p| p.id.as_str()),
                        error.code = err.code(),
                        error.message = err.message(),
                        "Token revocation failed during logout"
                    );
                }
            }
            Ok(Response::ok(serde_json::json!({ "message": LOGGED_OUT })))
        }
    }
}
