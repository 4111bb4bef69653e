//! Ordered path matching for Keystone.
//!
//! Routes are kept in a flat list and scanned in registration order. A route
//! matches when the method is equal, the segment counts are equal, and every
//! segment is either an equal literal or a `:name` parameter.
//!
//! - [`PathPattern`] - parsed `/jobs/:id` style pattern
//! - [`Params`] - parameters bound by a match, kept as raw strings
//! - [`RouteTable`] - registration-ordered table, first match wins
//!
//! There are no wildcard or catch-all segments.
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use keystone_router::RouteTable;
//!
//! let mut table = RouteTable::new();
//! table.insert(Method::GET, "/jobs/:id", "getJob");
//!
//! let found = table.find(&Method::GET, "/jobs/42").unwrap();
//! assert_eq!(*found.entry.value(), "getJob");
//! assert_eq!(found.params.get("id"), Some("42"));
//! ```

mod params;
mod pattern;
mod table;

pub use params::Params;
pub use pattern::{split_path, strip_query, PathPattern, PathSegment, PARAM_PREFIX};
pub use table::{RouteEntry, RouteMatch, RouteTable};
