//! Classification of arbitrary failures into [`StructuredError`]s.
//!
//! There is one name table, [`ClassificationTable::standard`], mapping a
//! failure's type discriminator (`"DatabaseError"`, `"TokenExpiredError"`, ...)
//! to an [`ErrorCategory`]. Call sites never match on names themselves.
//!
//! A failure that is already a [`StructuredError`] passes through unchanged.
//! Anything the table does not know becomes a `system` error with severity
//! `critical` that is retryable.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{ErrorCategory, Severity, StructuredError};

/// Implemented by failure types that carry a type discriminator.
pub trait FailureKind {
    /// The discriminator looked up in the [`ClassificationTable`].
    fn failure_kind(&self) -> &str;
}

/// A failure identified only by a discriminator name and a message.
///
/// Lets collaborators report failures by name without depending on
/// [`StructuredError`] directly.
///
/// ```
/// use keystone_core::{classify_anyhow, ErrorCategory, NamedFailure};
///
/// let err = anyhow::Error::new(NamedFailure::new("TokenExpiredError", "jwt expired"));
/// assert_eq!(classify_anyhow(&err).category(), ErrorCategory::Authentication);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFailure {
    kind: String,
    message: String,
}

impl NamedFailure {
    /// Creates a named failure.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for NamedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for NamedFailure {}

impl FailureKind for NamedFailure {
    fn failure_kind(&self) -> &str {
        &self.kind
    }
}

#[derive(Debug, Clone)]
struct Rule {
    category: ErrorCategory,
    code: Option<&'static str>,
}

/// Discriminator name to category mapping.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
    rules: HashMap<String, Rule>,
}

impl ClassificationTable {
    /// An empty table. Everything classifies as `system`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table.
    #[must_use]
    pub fn standard() -> &'static Self {
        static STANDARD: OnceLock<ClassificationTable> = OnceLock::new();
        STANDARD.get_or_init(Self::build_standard)
    }

    fn build_standard() -> Self {
        Self::empty()
            .with("ValidationError", ErrorCategory::Validation)
            .with("SyntaxError", ErrorCategory::Validation)
            .with("AuthenticationError", ErrorCategory::Authentication)
            .with_code("JsonWebTokenError", ErrorCategory::Authentication, "INVALID_TOKEN")
            .with_code("TokenExpiredError", ErrorCategory::Authentication, "TOKEN_EXPIRED")
            .with("AuthorizationError", ErrorCategory::Authorization)
            .with("NotFoundError", ErrorCategory::NotFound)
            .with("RateLimitError", ErrorCategory::RateLimit)
            .with("DatabaseError", ErrorCategory::Storage)
            .with("StorageError", ErrorCategory::Storage)
            .with("NetworkError", ErrorCategory::Network)
            .with_code("TimeoutError", ErrorCategory::Network, "TIMEOUT")
            .with("BusinessLogicError", ErrorCategory::BusinessLogic)
            .with("ExternalServiceError", ErrorCategory::ExternalService)
    }

    /// Adds or replaces a rule using the category's default code.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, category: ErrorCategory) -> Self {
        self.rules.insert(name.into(), Rule { category, code: None });
        self
    }

    /// Adds or replaces a rule with an explicit code.
    #[must_use]
    pub fn with_code(
        mut self,
        name: impl Into<String>,
        category: ErrorCategory,
        code: &'static str,
    ) -> Self {
        self.rules.insert(
            name.into(),
            Rule {
                category,
                code: Some(code),
            },
        );
        self
    }

    /// Category registered for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ErrorCategory> {
        self.rules.get(name).map(|rule| rule.category)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the table has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Builds the error for a discriminator and message.
    #[must_use]
    pub fn classify_named(&self, name: &str, message: &str) -> StructuredError {
        match self.rules.get(name) {
            Some(rule) => {
                let err = StructuredError::of(rule.category, message);
                match rule.code {
                    Some(code) => err.with_code(code),
                    None => err,
                }
            }
            None => unclassified(message),
        }
    }

    /// Classifies a failure that reports its own discriminator.
    pub fn classify_kind<E>(&self, failure: &E) -> StructuredError
    where
        E: FailureKind + fmt::Display + ?Sized,
    {
        self.classify_named(failure.failure_kind(), &failure.to_string())
            .with_cause(failure.to_string())
    }

    /// Classifies any `std::error::Error`.
    ///
    /// Walks the source chain looking for a [`StructuredError`] (returned
    /// unchanged), a [`NamedFailure`], a `serde_json::Error` or a timed-out or
    /// refused `std::io::Error`.
    pub fn classify_error(&self, error: &(dyn StdError + 'static)) -> StructuredError {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(structured) = err.downcast_ref::<StructuredError>() {
                return structured.clone();
            }
            if let Some(found) = self.classify_foreign(err) {
                return found.with_cause(error.to_string());
            }
            current = err.source();
        }
        unclassified(&error.to_string()).with_cause(error.to_string())
    }

    /// Classifies an `anyhow::Error`, checking every layer of its chain.
    pub fn classify_anyhow(&self, error: &anyhow::Error) -> StructuredError {
        if let Some(structured) = error.downcast_ref::<StructuredError>() {
            return structured.clone();
        }
        for cause in error.chain() {
            if let Some(structured) = cause.downcast_ref::<StructuredError>() {
                return structured.clone();
            }
            if let Some(found) = self.classify_foreign(cause) {
                return found.with_cause(format!("{error:#}"));
            }
        }
        unclassified(&error.to_string()).with_cause(format!("{error:#}"))
    }

    fn classify_foreign(&self, err: &(dyn StdError + 'static)) -> Option<StructuredError> {
        if let Some(named) = err.downcast_ref::<NamedFailure>() {
            return Some(self.classify_named(named.failure_kind(), named.message()));
        }
        if err.downcast_ref::<serde_json::Error>().is_some() {
            return Some(self.classify_named("ValidationError", &format!("Invalid JSON: {err}")));
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            let name = match io.kind() {
                std::io::ErrorKind::TimedOut => "TimeoutError",
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => "NetworkError",
                _ => return None,
            };
            return Some(self.classify_named(name, &io.to_string()));
        }
        None
    }
}

fn unclassified(message: &str) -> StructuredError {
    StructuredError::system(message).with_severity(Severity::Critical)
}

/// Classifies an `anyhow::Error` with the standard table.
pub fn classify_anyhow(error: &anyhow::Error) -> StructuredError {
    ClassificationTable::standard().classify_anyhow(error)
}

/// Classifies a `std::error::Error` with the standard table.
pub fn classify_error(error: &(dyn StdError + 'static)) -> StructuredError {
    ClassificationTable::standard().classify_error(error)
}

/// Classifies a [`FailureKind`] with the standard table.
pub fn classify_kind<E>(failure: &E) -> StructuredError
where
    E: FailureKind + fmt::Display + ?Sized,
{
    ClassificationTable::standard().classify_kind(failure)
}

impl From<anyhow::Error> for StructuredError {
    fn from(error: anyhow::Error) -> Self {
        classify_anyhow(&error)
    }
}

impl From<serde_json::Error> for StructuredError {
    fn from(error: serde_json::Error) -> Self {
        classify_error(&error)
    }
}

impl From<NamedFailure> for StructuredError {
    fn from(failure: NamedFailure) -> Self {
        classify_kind(&failure)
    }
}
