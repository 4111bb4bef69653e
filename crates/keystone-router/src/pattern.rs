//! Path patterns.
//!
//! A pattern such as `/jobs/:id/applications` is split on `/` into literal
//! and parameter segments. Empty segments are dropped on both sides, so
//! `/jobs/` and `/jobs` are the same path.

use std::fmt;

use crate::params::Params;

/// Prefix marking a parameter segment.
pub const PARAM_PREFIX: char = ':';

/// One segment of a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Must equal the request segment exactly.
    Literal(String),
    /// Matches any single non-empty segment and binds it under this name.
    Param(String),
}

impl PathSegment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(PARAM_PREFIX) {
            Some(name) if !name.is_empty() => Self::Param(name.to_string()),
            _ => Self::Literal(raw.to_string()),
        }
    }
}

/// A parsed route pattern.
///
/// No syntax validation happens beyond segment splitting; a segment is a
/// parameter if it starts with `:` followed by at least one character.
///
/// # Example
///
/// ```rust
/// use keystone_router::PathPattern;
///
/// let pattern = PathPattern::parse("/jobs/:id");
/// let params = pattern.match_path("/jobs/42").unwrap();
/// assert_eq!(params.get("id"), Some("42"));
///
/// assert!(pattern.match_path("/jobs/42/extra").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathPattern {
    /// Parses a pattern string.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            segments: split_path(pattern).map(PathSegment::parse).collect(),
        }
    }

    /// The pattern as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Names of the parameter segments in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            PathSegment::Param(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }

    /// Matches a request path (without query string).
    ///
    /// Returns the bound parameters, or `None` when segment counts differ or
    /// a literal segment disagrees.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let segments: Vec<&str> = split_path(path).collect();
        self.match_segments(&segments)
    }

    /// Matches a pre-split request path.
    ///
    /// Callers scanning many patterns split the path once and reuse it here.
    #[must_use]
    pub fn match_segments(&self, path: &[&str]) -> Option<Params> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (pattern, actual) in self.segments.iter().zip(path) {
            match pattern {
                PathSegment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.push(name.as_str(), *actual);
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Returns `path` with any `?query` suffix removed.
///
/// ```rust
/// use keystone_router::strip_query;
///
/// assert_eq!(strip_query("/jobs?page=2"), "/jobs");
/// assert_eq!(strip_query("/jobs"), "/jobs");
/// ```
#[must_use]
pub fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}
