//! Conversion between `http` wire types and Keystone requests/responses.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use keystone_core::{Outcome, Request, Response, StructuredError};
use keystone_telemetry::metrics;

use crate::router::Router;

/// Peer address of the connection a request arrived on.
///
/// The server inserts it into request extensions; it is the last fallback
/// for the client ip after `x-forwarded-for` and `x-real-ip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Parse failure for a request body that was not JSON.
///
/// [`into_request`] leaves the body empty and stores this in the request
/// extensions; [`Router::dispatch`] then fails the request inside the global
/// chain so it is tracked and rendered like any other error.
#[derive(Debug, Clone)]
pub struct InvalidBody(pub StructuredError);

const JSON: &str = "application/json";

impl Router {
    /// Serves one HTTP request.
    ///
    /// Errors that reach this point because no error-handling stage was
    /// registered are still rendered as an error envelope.
    pub async fn handle(&self, request: http::Request<Full<Bytes>>) -> http::Response<Full<Bytes>> {
        let request = into_request(request).await;
        let response = settle(self.dispatch(request).await);
        metrics::record_request(response.status().as_u16());
        into_http_response(response)
    }
}

/// Builds a [`Request`] from wire parts.
///
/// A non-empty body that is not JSON leaves the request without a body and
/// with an [`InvalidBody`] extension holding the validation error.
pub async fn into_request(request: http::Request<Full<Bytes>>) -> Request {
    let (parts, body) = request.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    let url = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut request = Request::new(parts.method, url).with_headers(parts.headers);
    if let Some(query) = parts.uri.query() {
        for (key, value) in parse_query(query) {
            request = request.with_query(key, value);
        }
    }

    if !bytes.is_empty() {
        match serde_json::from_slice(&bytes) {
            Ok(body) => request = request.with_body(body),
            Err(err) => {
                let error = StructuredError::validation(format!("Invalid JSON body: {err}"));
                request.extensions_mut().insert(InvalidBody(error));
            }
        }
    }

    let remote = parts.extensions.get::<RemoteAddr>().map(|addr| addr.0.ip().to_string());
    if let Some(ip) = forwarded_ip(&request).or(remote) {
        request = request.with_ip(ip);
    }
    request
}

/// Serializes a response for the wire with a JSON content type.
#[must_use]
pub fn into_http_response(response: Response) -> http::Response<Full<Bytes>> {
    let body = match response.body_bytes() {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize response envelope");
            let fallback = Response::from_error(&StructuredError::system(err.to_string()), false);
            return http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, JSON)
                .body(Full::new(Bytes::from(fallback.body_bytes().unwrap_or_default())))
                .unwrap_or_default();
        }
    };

    let (status, headers, _) = response.into_parts();
    let mut wire = http::Response::new(Full::new(Bytes::from(body)));
    *wire.status_mut() = status;
    *wire.headers_mut() = headers;
    wire.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    wire
}

fn settle(outcome: Outcome) -> Response {
    outcome.unwrap_or_else(|err| {
        tracing::error!(
            error.code = err.code(),
            error.category = err.category().as_str(),
            error.message = err.message(),
            "Unhandled error reached the transport"
        );
        Response::from_error(&err, false)
    })
}

fn parse_query(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query.split('&').filter(|pair| !pair.is_empty()).map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (decode(key), decode(value))
    })
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}

fn forwarded_ip(request: &Request) -> Option<String> {
    request
        .header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| request.header("x-real-ip").map(str::trim))
        .map(ToString::to_string)
}
