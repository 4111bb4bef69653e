//! Captured responses and envelope assertions.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use keystone_core::{Envelope, ResponseError};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TestError;

/// A response read fully into memory.
///
/// Assertion helpers panic with a descriptive message and return `&Self`
/// so they can be chained.
#[derive(Debug, Clone)]
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    pub(crate) async fn from_http(response: http::Response<Full<Bytes>>) -> Self {
        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header as a string, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::BodyRead`] for non-UTF-8 bodies.
    pub fn text(&self) -> Result<&str, TestError> {
        std::str::from_utf8(&self.body).map_err(|e| TestError::BodyRead(e.to_string()))
    }

    /// Body decoded as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Json`] if the body does not decode.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body decoded as a response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Json`] if the body is not an envelope.
    pub fn envelope(&self) -> Result<Envelope, TestError> {
        self.json()
    }

    /// The envelope's `data`, or `Value::Null` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Json`] if the body is not an envelope.
    pub fn data(&self) -> Result<Value, TestError> {
        Ok(self.envelope()?.data.unwrap_or(Value::Null))
    }

    /// The envelope's `error`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Json`] if the body is not an envelope.
    pub fn error(&self) -> Result<Option<ResponseError>, TestError> {
        Ok(self.envelope()?.error)
    }

    /// Asserts the status.
    ///
    /// # Panics
    ///
    /// Panics on mismatch.
    #[track_caller]
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "expected status {expected}, got {} with body {}",
            self.status,
            String::from_utf8_lossy(&self.body)
        );
        self
    }

    /// Asserts a `success: true` envelope.
    ///
    /// # Panics
    ///
    /// Panics if the body is not a success envelope.
    #[track_caller]
    pub fn assert_success(&self) -> &Self {
        match self.envelope() {
            Ok(envelope) => assert!(
                envelope.success,
                "expected success envelope, got error {:?}",
                envelope.error
            ),
            Err(err) => panic!("body is not an envelope: {err}"),
        }
        self
    }

    /// Asserts a `success: false` envelope carrying `code`.
    ///
    /// # Panics
    ///
    /// Panics if the body is not an error envelope with that code.
    #[track_caller]
    pub fn assert_error_code(&self, code: &str) -> &Self {
        match self.error() {
            Ok(Some(error)) => assert_eq!(error.code, code, "unexpected error code"),
            Ok(None) => panic!("expected error {code}, got a success envelope"),
            Err(err) => panic!("body is not an envelope: {err}"),
        }
        self
    }

    /// Asserts a header value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or differs.
    #[track_caller]
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        match self.header(name) {
            Some(actual) => assert_eq!(actual, expected, "header {name}"),
            None => panic!("header {name} not found"),
        }
        self
    }
}
