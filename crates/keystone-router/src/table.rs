//! Ordered route table.

use http::Method;
use smallvec::SmallVec;

use crate::params::Params;
use crate::pattern::{split_path, strip_query, PathPattern};

/// A registered `(method, pattern)` entry carrying a caller value.
#[derive(Debug, Clone)]
pub struct RouteEntry<T> {
    method: Method,
    pattern: PathPattern,
    value: T,
}

impl<T> RouteEntry<T> {
    /// The HTTP method this entry answers.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The parsed pattern.
    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// The caller value stored at registration.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }
}

/// Result of a successful [`RouteTable::find`].
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// The matched entry.
    pub entry: &'a RouteEntry<T>,
    /// Registration index of the matched entry.
    pub index: usize,
    /// Parameters bound from the path.
    pub params: Params,
}

/// Append-only list of routes scanned in registration order.
///
/// Lookup is a linear scan; the first entry whose method equals the request
/// method and whose pattern matches the path wins. Two entries of the same
/// shape (`/users/:id` and `/users/me`) are both kept, and whichever was
/// inserted first shadows the other.
///
/// # Example
///
/// ```rust
/// use http::Method;
/// use keystone_router::RouteTable;
///
/// let mut table = RouteTable::new();
/// table.insert(Method::GET, "/users/:id", "by-id");
/// table.insert(Method::GET, "/users/me", "me");
///
/// let found = table.find(&Method::GET, "/users/me").unwrap();
/// assert_eq!(*found.entry.value(), "by-id");
/// assert_eq!(found.params.get("id"), Some("me"));
/// ```
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    entries: Vec<RouteEntry<T>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> RouteTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route and returns its registration index.
    ///
    /// Duplicate `(method, pattern)` pairs are accepted.
    pub fn insert(&mut self, method: Method, pattern: &str, value: T) -> usize {
        self.entries.push(RouteEntry {
            method,
            pattern: PathPattern::parse(pattern),
            value,
        });
        self.entries.len() - 1
    }

    /// Finds the first entry matching `method` and `path`.
    ///
    /// Any query string on `path` is ignored.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        let segments: SmallVec<[&str; 8]> = split_path(strip_query(path)).collect();

        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.method == *method)
            .find_map(|(index, entry)| {
                entry
                    .pattern
                    .match_segments(&segments)
                    .map(|params| RouteMatch {
                        entry,
                        index,
                        params,
                    })
            })
    }

    /// Returns `true` if some entry matches `path` under any method.
    #[must_use]
    pub fn matches_any_method(&self, path: &str) -> bool {
        let segments: SmallVec<[&str; 8]> = split_path(strip_query(path)).collect();
        self.entries
            .iter()
            .any(|entry| entry.pattern.match_segments(&segments).is_some())
    }

    /// Iterates entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry<T>> {
        self.entries.iter()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
