//! # Keystone Core
//!
//! Shared types for the Keystone request dispatch layer.
//!
//! - [`StructuredError`] - the one error type of the request path
//! - [`ClassificationTable`] / [`classify_anyhow`] - turn arbitrary failures into [`StructuredError`]s
//! - [`Request`] / [`Response`] / [`Envelope`] - what flows through the pipeline
//! - [`Outcome`] - the result every pipeline step returns

#![doc(html_root_url = "https://docs.rs/keystone-core/0.1.0")]

mod classify;
mod error;
mod request;
mod response;

pub use classify::{
    classify_anyhow, classify_error, classify_kind, ClassificationTable, FailureKind,
    NamedFailure,
};
pub use error::{
    ContextPatch, ErrorCategory, ErrorContext, ErrorDetails, FieldErrors, ResponseError,
    ResponseErrorDetails, Severity, StructuredError, INTERNAL_MESSAGE,
};
pub use keystone_router::Params;
pub use request::{Principal, Request, RequestId};
pub use response::{Envelope, Meta, Response};

/// Result of every middleware and handler.
///
/// Raising an error and returning one are the same operation.
pub type Outcome = Result<Response, StructuredError>;
