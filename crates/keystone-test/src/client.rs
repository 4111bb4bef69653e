//! In-memory client.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method};
use http_body_util::Full;
use keystone_server::{App, Router};
use serde::Serialize;

use crate::error::TestError;
use crate::response::TestResponse;

/// Dispatches requests through a [`Router`] without a network.
///
/// Requests go through [`Router::handle`], so they see exactly what a client
/// of the HTTP server would: the full middleware chain, JSON encoding and
/// transport headers.
#[derive(Debug, Clone)]
pub struct TestClient {
    router: Arc<Router>,
    default_headers: HeaderMap,
}

impl TestClient {
    /// Wraps a router.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            default_headers: HeaderMap::new(),
        }
    }

    /// Wraps a configured application's router.
    #[must_use]
    pub fn from_app(app: App) -> Self {
        Self::new(app.into_router())
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::InvalidHeader`] if the name or value is invalid.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Result<Self, TestError> {
        let (name, value) = parse_header(name, value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// The wrapped router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Starts a `GET` request.
    pub fn get(&self, uri: &str) -> TestRequest<'_> {
        self.request(Method::GET, uri)
    }

    /// Starts a `POST` request.
    pub fn post(&self, uri: &str) -> TestRequest<'_> {
        self.request(Method::POST, uri)
    }

    /// Starts a `PUT` request.
    pub fn put(&self, uri: &str) -> TestRequest<'_> {
        self.request(Method::PUT, uri)
    }

    /// Starts a `PATCH` request.
    pub fn patch(&self, uri: &str) -> TestRequest<'_> {
        self.request(Method::PATCH, uri)
    }

    /// Starts a `DELETE` request.
    pub fn delete(&self, uri: &str) -> TestRequest<'_> {
        self.request(Method::DELETE, uri)
    }

    /// Starts a request with any method.
    pub fn request(&self, method: Method, uri: &str) -> TestRequest<'_> {
        TestRequest {
            client: self,
            method,
            uri: uri.to_string(),
            headers: self.default_headers.clone(),
            body: Bytes::new(),
            error: None,
        }
    }
}

/// A request being built against a [`TestClient`].
///
/// Builder errors are kept until [`TestRequest::try_send`] so calls can be
/// chained.
#[derive(Debug)]
pub struct TestRequest<'a> {
    client: &'a TestClient,
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    error: Option<TestError>,
}

impl TestRequest<'_> {
    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer_token(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    /// Sets the client ip through `x-forwarded-for`.
    #[must_use]
    pub fn ip(self, ip: &str) -> Self {
        self.header("x-forwarded-for", ip)
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Bytes::from(body);
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(err) => self.fail(err.into()),
        }
        self
    }

    fn fail(&mut self, err: TestError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Sends the request.
    ///
    /// # Errors
    ///
    /// Returns the first builder error, or [`TestError::RequestBuild`] if the
    /// URI is invalid.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut request = http::Request::builder()
            .method(self.method)
            .uri(self.uri)
            .body(Full::new(self.body))?;
        *request.headers_mut() = self.headers;

        let response = self.client.router.handle(request).await;
        Ok(TestResponse::from_http(response).await)
    }

    /// Sends the request, panicking on builder errors.
    ///
    /// # Panics
    ///
    /// Panics if a header, body or URI was invalid.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(err) => panic!("test request failed: {err}"),
        }
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TestError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
    let value =
        HeaderValue::from_str(value).map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
    Ok((name, value))
}
