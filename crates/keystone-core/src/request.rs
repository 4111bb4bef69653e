//! The request value that flows through the pipeline.

use std::collections::HashMap;
use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, Method};
use keystone_router::{strip_query, Params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A UUID v7 request identifier.
///
/// ```
/// use keystone_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(RequestId::parse(&id.to_string()), Some(id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses an inbound id. Anything that is not a UUID is rejected.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated caller as returned by the token verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user id.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Role name, e.g. `admin`, `instructor`, `student`.
    pub role: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role: role.into(),
        }
    }
}

/// An inbound request.
///
/// Middleware may attach a principal, a request id, headers or typed
/// extensions before handing the request on. Path parameters are empty until
/// the router binds them.
///
/// # Example
///
/// ```
/// use http::Method;
/// use keystone_core::Request;
///
/// let req = Request::new(Method::GET, "/jobs/42?expand=true")
///     .with_query("expand", "true")
///     .with_ip("10.0.0.1");
/// assert_eq!(req.path(), "/jobs/42");
/// assert_eq!(req.url(), "/jobs/42?expand=true");
/// assert_eq!(req.query("expand"), Some("true"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    query: HashMap<String, String>,
    params: Params,
    body: Option<Value>,
    principal: Option<Principal>,
    request_id: Option<RequestId>,
    ip: Option<String>,
    extensions: Extensions,
}

impl Request {
    /// Creates a request for `method` and `url` (path plus optional query).
    ///
    /// The query string is kept for [`Request::url`]; decoded query values are
    /// supplied separately through [`Request::with_query`].
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: HashMap::new(),
            params: Params::new(),
            body: None,
            principal: None,
            request_id: None,
            ip: None,
            extensions: Extensions::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Adds a decoded query value.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        strip_query(&self.url)
    }

    /// Path and query as received.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Header value as a string. Names are case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// A decoded query value.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// All decoded query values.
    #[must_use]
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// A bound path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All bound path parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Replaces the path parameters. Called by the router on a match.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// The JSON body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// A top-level string field of the JSON body.
    #[must_use]
    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body.as_ref()?.get(field)?.as_str()
    }

    /// The authenticated principal.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Attaches the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// The request id assigned by middleware.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Assigns the request id.
    pub fn set_request_id(&mut self, id: RequestId) {
        self.request_id = Some(id);
    }

    /// Client address.
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// Client address or `"unknown"`.
    #[must_use]
    pub fn ip_or_unknown(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }

    /// Bearer token from the `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(http::header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Typed extensions.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable typed extensions.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
