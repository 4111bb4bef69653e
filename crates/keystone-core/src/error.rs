//! The structured error model.
//!
//! Every failure that crosses the request pipeline is a [`StructuredError`]:
//! a stable machine code, an HTTP status, a [`Severity`], an
//! [`ErrorCategory`], retry metadata, request context, and optional typed
//! [`ErrorDetails`].
//!
//! # Category defaults
//!
//! | Category | Status | Severity | Retryable | Retry hint |
//! |---|---|---|---|---|
//! | `validation` | 400 | low | no | - |
//! | `authentication` | 401 | medium | no | - |
//! | `authorization` | 403 | medium | no | - |
//! | `not_found` | 404 | low | no | - |
//! | `rate_limit` | 429 | medium | yes | caller supplied |
//! | `storage` | 500 | high | yes | 5s |
//! | `network` | 502 | medium | yes | 10s |
//! | `business_logic` | 422 | medium | no | - |
//! | `system` | 500 | critical | yes | 30s |
//! | `external_service` | 502 | high | yes | 10s |
//!
//! Errors are never mutated after construction. [`StructuredError::with_context`]
//! returns a new value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// How bad a failure is. Drives log level and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected, caller-caused failures.
    Low,
    /// Noteworthy but routine.
    Medium,
    /// Degraded dependency or data path.
    High,
    /// Unclassified or system-level failure.
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or rejected input.
    Validation,
    /// Missing or invalid credentials.
    #[serde(alias = "auth_n")]
    Authentication,
    /// Authenticated but not permitted.
    #[serde(alias = "auth_z")]
    Authorization,
    /// No such route or resource.
    NotFound,
    /// Caller exceeded a rate limit.
    RateLimit,
    /// Database or storage failure.
    Storage,
    /// Network failure or timeout.
    Network,
    /// A business rule rejected the operation.
    BusinessLogic,
    /// Anything else.
    System,
    /// A downstream service failed.
    ExternalService,
}

impl ErrorCategory {
    /// All categories in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Validation,
        Self::Authentication,
        Self::Authorization,
        Self::NotFound,
        Self::RateLimit,
        Self::Storage,
        Self::Network,
        Self::BusinessLogic,
        Self::System,
        Self::ExternalService,
    ];

    /// Stable snake_case name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::BusinessLogic => "business_logic",
            Self::System => "system",
            Self::ExternalService => "external_service",
        }
    }

    /// Default machine code for errors of this category.
    #[must_use]
    pub const fn default_code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimit => "RATE_LIMIT_EXCEEDED",
            Self::Storage => "DATABASE_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::BusinessLogic => "BUSINESS_LOGIC_ERROR",
            Self::System => "SYSTEM_ERROR",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Default HTTP status.
    #[must_use]
    pub const fn default_status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage | Self::System => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Network | Self::ExternalService => StatusCode::BAD_GATEWAY,
            Self::BusinessLogic => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Default severity.
    #[must_use]
    pub const fn default_severity(&self) -> Severity {
        match self {
            Self::Validation | Self::NotFound => Severity::Low,
            Self::Authentication
            | Self::Authorization
            | Self::RateLimit
            | Self::Network
            | Self::BusinessLogic => Severity::Medium,
            Self::Storage | Self::ExternalService => Severity::High,
            Self::System => Severity::Critical,
        }
    }

    /// Whether errors of this category are retryable by default.
    #[must_use]
    pub const fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Storage | Self::Network | Self::System | Self::ExternalService
        )
    }

    /// Default retry hint in milliseconds, if the category has one.
    #[must_use]
    pub const fn default_retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Storage => Some(5_000),
            Self::Network | Self::ExternalService => Some(10_000),
            Self::System => Some(30_000),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped facts attached to an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Correlation id of the failing request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Authenticated principal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Request path including query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// When the error was constructed.
    pub timestamp: DateTime<Utc>,
    /// Free-form extra fields.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub extra: Map<String, Value>,
}

impl ErrorContext {
    fn stamped_now() -> Self {
        Self {
            request_id: None,
            principal_id: None,
            ip: None,
            url: None,
            method: None,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    fn merged(&self, patch: ContextPatch) -> Self {
        let mut extra = self.extra.clone();
        extra.extend(patch.extra);
        Self {
            request_id: patch.request_id.or_else(|| self.request_id.clone()),
            principal_id: patch.principal_id.or_else(|| self.principal_id.clone()),
            ip: patch.ip.or_else(|| self.ip.clone()),
            url: patch.url.or_else(|| self.url.clone()),
            method: patch.method.or_else(|| self.method.clone()),
            timestamp: patch.timestamp.unwrap_or(self.timestamp),
            extra,
        }
    }
}

/// A partial [`ErrorContext`] merged by [`StructuredError::with_context`].
///
/// Fields that are set overwrite the error's existing values; `extra` keys
/// overwrite existing keys of the same name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextPatch {
    /// Correlation id.
    pub request_id: Option<String>,
    /// Principal id.
    pub principal_id: Option<String>,
    /// Client address.
    pub ip: Option<String>,
    /// Request URL.
    pub url: Option<String>,
    /// Request method.
    pub method: Option<String>,
    /// Replacement timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extra fields.
    pub extra: Map<String, Value>,
}

impl ContextPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request id.
    pub fn request_id(mut self, value: impl Into<String>) -> Self {
        self.request_id = Some(value.into());
        self
    }

    /// Sets the principal id.
    pub fn principal_id(mut self, value: impl Into<String>) -> Self {
        self.principal_id = Some(value.into());
        self
    }

    /// Sets the client address.
    pub fn ip(mut self, value: impl Into<String>) -> Self {
        self.ip = Some(value.into());
        self
    }

    /// Sets the request URL.
    pub fn url(mut self, value: impl Into<String>) -> Self {
        self.url = Some(value.into());
        self
    }

    /// Sets the request method.
    pub fn method(mut self, value: impl Into<String>) -> Self {
        self.method = Some(value.into());
        self
    }

    /// Adds an extra field.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Field-level validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Builder form of [`FieldErrors::add`].
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    /// Messages for one field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// Returns `true` if no field has errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields with errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Typed detail payloads, one shape per kind of failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Per-field validation messages.
    Validation {
        /// Field to messages.
        fields: FieldErrors,
    },
    /// Rate-limit rejection.
    #[serde(rename_all = "camelCase")]
    RateLimit {
        /// Seconds until the caller may retry.
        retry_after_seconds: u64,
        /// Attempts allowed per window.
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    /// Missing resource.
    #[serde(rename_all = "camelCase")]
    NotFound {
        /// Resource kind, e.g. `Job`.
        resource_type: String,
        /// Identifier that was looked up.
        resource_id: String,
    },
    /// Failing downstream service.
    ExternalService {
        /// Service name.
        service: String,
    },
    /// Anything else.
    Extra(Map<String, Value>),
}

impl ErrorDetails {
    fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// The uniform error value produced for every failure.
///
/// # Example
///
/// ```
/// use keystone_core::{ErrorCategory, StructuredError};
///
/// let err = StructuredError::storage("connection refused");
/// assert_eq!(err.category(), ErrorCategory::Storage);
/// assert_eq!(err.status().as_u16(), 500);
/// assert!(err.is_retryable());
/// assert_eq!(err.retry_after_ms(), Some(5_000));
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StructuredError {
    code: String,
    message: String,
    status: StatusCode,
    severity: Severity,
    category: ErrorCategory,
    retryable: bool,
    retry_after_ms: Option<u64>,
    context: ErrorContext,
    details: Option<ErrorDetails>,
    cause: Option<String>,
    headers: HeaderMap,
}

impl StructuredError {
    /// Creates an error with the bare defaults: status 500, severity medium,
    /// category system, not retryable.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            severity: Severity::Medium,
            category: ErrorCategory::System,
            retryable: false,
            retry_after_ms: None,
            context: ErrorContext::stamped_now(),
            details: None,
            cause: None,
            headers: HeaderMap::new(),
        }
    }

    /// Creates an error carrying every default of `category`.
    #[must_use]
    pub fn of(category: ErrorCategory, message: impl Into<String>) -> Self {
        let retryable = category.default_retryable();
        Self {
            code: category.default_code().to_string(),
            status: category.default_status(),
            severity: category.default_severity(),
            category,
            retryable,
            retry_after_ms: if retryable {
                category.default_retry_after_ms()
            } else {
                None
            },
            ..Self::new(String::new(), message)
        }
    }

    /// Invalid input.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::Validation, message)
    }

    /// Invalid input with per-field messages.
    #[must_use]
    pub fn validation_with_fields(message: impl Into<String>, fields: FieldErrors) -> Self {
        Self::validation(message).with_details(ErrorDetails::Validation { fields })
    }

    /// Missing or bad credentials.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::Authentication, message)
    }

    /// Insufficient permissions.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::Authorization, message)
    }

    /// Missing route or resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::NotFound, message)
    }

    /// Missing resource, with its type and id in the details.
    #[must_use]
    pub fn not_found_resource(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        Self::not_found(format!("{resource_type} with ID '{resource_id}' not found")).with_details(
            ErrorDetails::NotFound {
                resource_type,
                resource_id,
            },
        )
    }

    /// Rate limit exceeded; `retry_after_secs` is caller supplied.
    #[must_use]
    pub fn rate_limit(message: impl Into<String>, retry_after_secs: u64, limit: Option<u32>) -> Self {
        Self::of(ErrorCategory::RateLimit, message)
            .with_retry_after_ms(retry_after_secs.saturating_mul(1000))
            .with_details(ErrorDetails::RateLimit {
                retry_after_seconds: retry_after_secs,
                limit,
            })
    }

    /// Database or storage failure.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::Storage, message)
    }

    /// Network failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::Network, message)
    }

    /// A deadline expired. Network category, status 504.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::network(message)
            .with_code("TIMEOUT")
            .with_status(StatusCode::GATEWAY_TIMEOUT)
    }

    /// Business rule violation.
    #[must_use]
    pub fn business_logic(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::BusinessLogic, message)
    }

    /// Generic system failure.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::System, message)
    }

    /// Downstream service failure.
    #[must_use]
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::of(ErrorCategory::ExternalService, message).with_details(
            ErrorDetails::ExternalService {
                service: service.into(),
            },
        )
    }

    /// Replaces the machine code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Replaces the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Replaces the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Replaces the category. Status, severity and retry metadata are kept.
    #[must_use]
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets retryability. Clearing it also drops any retry hint.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        if !retryable {
            self.retry_after_ms = None;
        }
        self
    }

    /// Sets the retry hint. Ignored on non-retryable errors.
    #[must_use]
    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        if self.retryable {
            self.retry_after_ms = Some(retry_after_ms);
        }
        self
    }

    /// Attaches typed details.
    #[must_use]
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Records the text of the underlying failure. Logged, never sent to clients.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Adds a header to copy onto the rendered error response.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns a copy with `patch` merged into the context.
    ///
    /// `self` is left untouched.
    #[must_use]
    pub fn with_context(&self, patch: ContextPatch) -> Self {
        Self {
            context: self.context.merged(patch),
            ..self.clone()
        }
    }

    /// Machine code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Whether the caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Retry hint in milliseconds.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }

    /// Retry hint in whole seconds, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_ms.map(|ms| ms.div_ceil(1000))
    }

    /// Request context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Typed details.
    #[must_use]
    pub const fn details(&self) -> Option<&ErrorDetails> {
        self.details.as_ref()
    }

    /// Headers carried to the rendered response.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Text of the underlying failure, if recorded.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Projects to the client wire shape.
    ///
    /// With `expose_internal` false, `system` errors carry the generic message
    /// `"Internal server error"` instead of their own.
    #[must_use]
    pub fn to_response_error(&self, expose_internal: bool) -> ResponseError {
        let message = if !expose_internal && self.category == ErrorCategory::System {
            INTERNAL_MESSAGE.to_string()
        } else {
            self.message.clone()
        };

        ResponseError {
            code: self.code.clone(),
            message,
            status_code: self.status.as_u16(),
            details: Some(ResponseErrorDetails {
                severity: self.severity,
                category: self.category,
                is_retryable: self.retryable,
                retry_after: self.retry_after_secs(),
                extra: self
                    .details
                    .as_ref()
                    .map(ErrorDetails::to_map)
                    .unwrap_or_default(),
            }),
        }
    }
}

/// Message shown for masked internal errors.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Wire shape of an error inside a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    /// Machine code.
    pub code: String,
    /// Client-visible message.
    pub message: String,
    /// HTTP status as a number.
    pub status_code: u16,
    /// Classification metadata and typed details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ResponseErrorDetails>,
}

/// The `details` object of a [`ResponseError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseErrorDetails {
    /// Severity.
    pub severity: Severity,
    /// Category.
    pub category: ErrorCategory,
    /// Whether the client may retry.
    pub is_retryable: bool,
    /// Seconds to wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Flattened typed details.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
