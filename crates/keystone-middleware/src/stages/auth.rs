//! Bearer-token authentication and role checks.
//!
//! Token verification is delegated to an [`Authenticator`]; this module only
//! extracts the token, attaches the resulting [`Principal`] and decides what a
//! failure means:
//!
//! - [`AuthMiddleware`] rejects requests without a valid token.
//! - [`OptionalAuthMiddleware`] discards authentication failures and lets the
//!   request through unauthenticated.
//! - [`RoleGuard`] checks the attached principal's role.

use std::sync::Arc;

use keystone_core::{ContextPatch, ErrorDetails, Outcome, Principal, Request, StructuredError};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Message for requests without a bearer token.
pub const TOKEN_REQUIRED: &str = "Authentication token required";

/// Verifies bearer tokens.
pub trait Authenticator: Send + Sync + 'static {
    /// Resolves `token` to a principal, or fails with an authentication error.
    fn authenticate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, StructuredError>>;

    /// Revokes `token`. The default does nothing.
    fn revoke<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), StructuredError>> {
        let _ = token;
        Box::pin(async { Ok(()) })
    }
}

/// Requires a valid bearer token.
#[derive(Clone)]
pub struct AuthMiddleware {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let token = request
                .bearer_token()
                .map(str::to_owned)
                .ok_or_else(|| StructuredError::authentication(TOKEN_REQUIRED))?;

            let principal = self.authenticator.authenticate(&token).await?;
            let principal_id = principal.id.clone();
            request.set_principal(principal);

            next.run(request).await.map_err(|error| {
                if error.context().principal_id.is_some() {
                    error
                } else {
                    error.with_context(ContextPatch::new().principal_id(principal_id))
                }
            })
        })
    }
}

/// Attaches a principal when a valid token is present, and otherwise carries on.
#[derive(Clone)]
pub struct OptionalAuthMiddleware {
    authenticator: Arc<dyn Authenticator>,
}

impl OptionalAuthMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl std::fmt::Debug for OptionalAuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionalAuthMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for OptionalAuthMiddleware {
    fn name(&self) -> &'static str {
        "optional_auth"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if let Some(token) = request.bearer_token().map(str::to_owned) {
                match self.authenticator.authenticate(&token).await {
                    Ok(principal) => request.set_principal(principal),
                    Err(error) => tracing::debug!(
                        error.code = error.code(),
                        "Optional authentication failed, continuing unauthenticated"
                    ),
                }
            }
            next.run(request).await
        })
    }
}

/// Allows only principals whose role is in the allow-list.
#[derive(Debug, Clone)]
pub struct RoleGuard {
    roles: Vec<String>,
}

impl RoleGuard {
    /// Allows `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Allowed roles.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Checks `request` without running anything downstream.
    pub fn check(&self, request: &Request) -> Result<(), StructuredError> {
        let principal = request
            .principal()
            .ok_or_else(|| StructuredError::authentication(TOKEN_REQUIRED))?;

        if self.roles.iter().any(|role| *role == principal.role) {
            return Ok(());
        }

        let mut extra = serde_json::Map::new();
        extra.insert("requiredRoles".into(), serde_json::json!(self.roles));
        Err(StructuredError::authorization("Insufficient permissions")
            .with_details(ErrorDetails::Extra(extra))
            .with_context(ContextPatch::new().principal_id(principal.id.clone())))
    }
}

impl Middleware for RoleGuard {
    fn name(&self) -> &'static str {
        "role_guard"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.check(&request)?;
            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, AUTHORIZATION};
    use http::{Method, StatusCode};
    use keystone_core::{ErrorCategory, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTokens;

    impl Authenticator for StaticTokens {
        fn authenticate<'a>(
            &'a self,
            token: &'a str,
        ) -> BoxFuture<'a, Result<Principal, StructuredError>> {
            Box::pin(async move {
                match token {
                    "admin-token" => Ok(Principal::new("u-1", "admin@x.io", "admin")),
                    "student-token" => Ok(Principal::new("u-2", "s@x.io", "student")),
                    _ => Err(StructuredError::authentication("Invalid token")
                        .with_code("INVALID_TOKEN")),
                }
            })
        }
    }

    fn bearer(token: &str) -> Request {
        Request::new(Method::GET, "/me").with_header(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        )
    }

    fn whoami<'a>(hits: Arc<AtomicUsize>) -> Next<'a> {
        Next::terminal(move |req| {
            Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let id = req.principal().map(|p| p.id.clone());
                Ok(Response::ok(serde_json::json!(id)))
            })
        })
    }

    #[tokio::test]
    async fn test_required_auth_attaches_principal() {
        let mw = AuthMiddleware::new(Arc::new(StaticTokens));
        let hits = Arc::new(AtomicUsize::new(0));
        let response = Next::new(&mw, whoami(Arc::clone(&hits)))
            .run(bearer("admin-token"))
            .await
            .unwrap();
        assert_eq!(response.envelope().data, Some(serde_json::json!("u-1")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_required_auth_rejects_missing_token() {
        let mw = AuthMiddleware::new(Arc::new(StaticTokens));
        let hits = Arc::new(AtomicUsize::new(0));
        let error = Next::new(&mw, whoami(Arc::clone(&hits)))
            .run(Request::new(Method::GET, "/me"))
            .await
            .unwrap_err();
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.message(), TOKEN_REQUIRED);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_required_auth_rejects_bad_token() {
        let mw = AuthMiddleware::new(Arc::new(StaticTokens));
        let error = Next::new(&mw, whoami(Arc::default()))
            .run(bearer("forged"))
            .await
            .unwrap_err();
        assert_eq!(error.code(), "INVALID_TOKEN");
        assert_eq!(error.category(), ErrorCategory::Authentication);
    }

    #[tokio::test]
    async fn test_downstream_error_carries_principal() {
        let mw = AuthMiddleware::new(Arc::new(StaticTokens));
        let terminal = Next::terminal(|_req| {
            Box::pin(async { Err(StructuredError::business_logic("Course is full")) })
        });
        let error = Next::new(&mw, terminal)
            .run(bearer("student-token"))
            .await
            .unwrap_err();
        assert_eq!(error.context().principal_id.as_deref(), Some("u-2"));
    }

    #[tokio::test]
    async fn test_optional_auth_swallows_failures() {
        let mw = OptionalAuthMiddleware::new(Arc::new(StaticTokens));
        let hits = Arc::new(AtomicUsize::new(0));

        let anonymous = Next::new(&mw, whoami(Arc::clone(&hits)))
            .run(bearer("forged"))
            .await
            .unwrap();
        assert_eq!(anonymous.envelope().data, Some(serde_json::Value::Null));

        let authed = Next::new(&mw, whoami(Arc::clone(&hits)))
            .run(bearer("student-token"))
            .await
            .unwrap();
        assert_eq!(authed.envelope().data, Some(serde_json::json!("u-2")));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_role_guard() {
        let auth = AuthMiddleware::new(Arc::new(StaticTokens));
        let guard = RoleGuard::new(["admin"]);

        let allowed = Next::new(&auth, Next::new(&guard, whoami(Arc::default())))
            .run(bearer("admin-token"))
            .await;
        assert!(allowed.is_ok());

        let denied = Next::new(&auth, Next::new(&guard, whoami(Arc::default())))
            .run(bearer("student-token"))
            .await
            .unwrap_err();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(denied.context().principal_id.as_deref(), Some("u-2"));

        let unauthenticated = Next::new(&guard, whoami(Arc::default()))
            .run(Request::new(Method::GET, "/me"))
            .await
            .unwrap_err();
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }
}
