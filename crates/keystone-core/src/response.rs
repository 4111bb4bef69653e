//! Response envelope.
//!
//! Every response body has the same JSON shape:
//!
//! ```json
//! {
//!   "success": true,
//!   "data": {},
//!   "error": { "code": "...", "message": "...", "statusCode": 400, "details": {} },
//!   "meta": { "timestamp": "...", "requestId": "...", "retryAfter": 30 },
//!   "headers": { "x-custom": "value" }
//! }
//! ```
//!
//! `data` and `error` are mutually exclusive by convention.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResponseError, StructuredError};

/// The `meta` object of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// When the response was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Seconds the client should wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Current page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Total items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Total pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

/// The JSON body of every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// Diagnostic and pagination fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    /// Header echo for clients that cannot read transport headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Envelope {
    /// A success envelope.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
            headers: None,
        }
    }

    /// A failure envelope.
    #[must_use]
    pub fn error(error: ResponseError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
            headers: None,
        }
    }
}

/// A response: status, transport headers and envelope.
///
/// # Example
///
/// ```
/// use keystone_core::Response;
///
/// let res = Response::ok(serde_json::json!({"id": 42}));
/// assert_eq!(res.status().as_u16(), 200);
/// assert!(res.envelope().success);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    envelope: Envelope,
}

impl Response {
    /// A response with an explicit status and envelope.
    #[must_use]
    pub fn new(status: StatusCode, envelope: Envelope) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            envelope,
        }
    }

    /// `200 OK` with `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self::new(StatusCode::OK, Envelope::data(data))
    }

    /// `201 Created` with `data`.
    #[must_use]
    pub fn created(data: Value) -> Self {
        Self::new(StatusCode::CREATED, Envelope::data(data))
    }

    /// `200 OK` serializing `data`.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, StructuredError> {
        let value = serde_json::to_value(data).map_err(|e| {
            StructuredError::system("Failed to serialize response").with_cause(e.to_string())
        })?;
        Ok(Self::ok(value))
    }

    /// `200 OK` with pagination metadata.
    #[must_use]
    pub fn paginated(data: Value, page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        let mut res = Self::ok(data);
        res.envelope.meta = Some(Meta {
            page: Some(page),
            limit: Some(limit),
            total: Some(total),
            total_pages: Some(total_pages),
            ..Meta::default()
        });
        res
    }

    /// A `success:false` response for `error`, using its status and any
    /// headers the error carries.
    #[must_use]
    pub fn from_error(error: &StructuredError, expose_internal: bool) -> Self {
        let mut res = Self::new(
            error.status(),
            Envelope::error(error.to_response_error(expose_internal)),
        );
        res.headers.clone_from(error.headers());
        res
    }

    /// Adds a transport header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Transport headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable transport headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Envelope.
    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Mutable envelope.
    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    /// The envelope's meta, created if absent.
    pub fn meta_mut(&mut self) -> &mut Meta {
        self.envelope.meta.get_or_insert_with(Meta::default)
    }

    /// Splits into parts.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Envelope) {
        (self.status, self.headers, self.envelope)
    }

    /// Serializes the envelope.
    pub fn body_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.envelope)
    }
}
