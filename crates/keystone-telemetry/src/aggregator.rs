//! In-memory error aggregation.
//!
//! Counts errors by exact `(code, message)` and exposes summary statistics.
//! This is low-cardinality observability, not an audit log: entries live only
//! in process memory and are evicted by [`ErrorAggregator::cleanup`], which
//! something outside the aggregator has to call.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use keystone_core::{ErrorCategory, Severity, StructuredError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics;

/// Default number of entries in [`ErrorStats::top_errors`].
pub const DEFAULT_TOP_N: usize = 10;

/// Default entry age before [`ErrorAggregator::cleanup`] evicts it.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Counters for one `(code, message)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateEntry {
    /// `code:message`.
    pub error_key: String,
    /// Machine code.
    pub code: String,
    /// Message.
    pub message: String,
    /// Severity of the first occurrence.
    pub severity: Severity,
    /// Category of the first occurrence.
    pub category: ErrorCategory,
    /// Occurrences.
    pub count: u64,
    /// When first tracked.
    pub first_occurrence: DateTime<Utc>,
    /// When last tracked.
    pub last_occurrence: DateTime<Utc>,
}

/// Snapshot returned by [`ErrorAggregator::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    /// Sum of every entry's count.
    pub total: u64,
    /// Occurrences per severity.
    pub by_severity: BTreeMap<Severity, u64>,
    /// Occurrences per category.
    pub by_category: BTreeMap<ErrorCategory, u64>,
    /// Most frequent entries, highest count first; ties keep first-seen order.
    pub top_errors: Vec<AggregateEntry>,
}

/// Process-wide error counters.
///
/// Construct one per process and share it behind an `Arc`; every method
/// takes `&self`.
///
/// # Example
///
/// ```
/// use keystone_core::StructuredError;
/// use keystone_telemetry::ErrorAggregator;
///
/// let aggregator = ErrorAggregator::new();
/// aggregator.track(&StructuredError::not_found("Job 7 not found"));
/// aggregator.track(&StructuredError::not_found("Job 7 not found"));
///
/// let stats = aggregator.stats();
/// assert_eq!(stats.total, 2);
/// assert_eq!(stats.top_errors[0].count, 2);
/// ```
#[derive(Debug)]
pub struct ErrorAggregator {
    entries: Mutex<IndexMap<(String, String), AggregateEntry>>,
    top_n: usize,
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAggregator {
    /// Creates an aggregator reporting the top 10 entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_top_n(DEFAULT_TOP_N)
    }

    /// Creates an aggregator reporting the top `top_n` entries.
    #[must_use]
    pub fn with_top_n(top_n: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            top_n,
        }
    }

    /// Records one occurrence and logs it at a level chosen by severity.
    pub fn track(&self, error: &StructuredError) {
        self.track_at(error, Utc::now());
    }

    /// [`ErrorAggregator::track`] with an explicit clock.
    pub fn track_at(&self, error: &StructuredError, now: DateTime<Utc>) {
        let count = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry((error.code().to_string(), error.message().to_string()))
                .or_insert_with(|| AggregateEntry {
                    error_key: format!("{}:{}", error.code(), error.message()),
                    code: error.code().to_string(),
                    message: error.message().to_string(),
                    severity: error.severity(),
                    category: error.category(),
                    count: 0,
                    first_occurrence: now,
                    last_occurrence: now,
                });
            entry.count += 1;
            entry.last_occurrence = now;
            entry.count
        };

        log_error(error, count);
        metrics::record_error(error);
    }

    /// Summary statistics.
    #[must_use]
    pub fn stats(&self) -> ErrorStats {
        let entries = self.entries.lock();

        let mut by_severity = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut total = 0;
        for entry in entries.values() {
            total += entry.count;
            *by_severity.entry(entry.severity).or_insert(0) += entry.count;
            *by_category.entry(entry.category).or_insert(0) += entry.count;
        }

        let mut top_errors: Vec<AggregateEntry> = entries.values().cloned().collect();
        // stable: equal counts stay in first-seen order
        top_errors.sort_by(|a, b| b.count.cmp(&a.count));
        top_errors.truncate(self.top_n);

        ErrorStats {
            total,
            by_severity,
            by_category,
            top_errors,
        }
    }

    /// Current entry for a `(code, message)` pair.
    #[must_use]
    pub fn get(&self, code: &str, message: &str) -> Option<AggregateEntry> {
        self.entries
            .lock()
            .get(&(code.to_string(), message.to_string()))
            .cloned()
    }

    /// Evicts entries last seen more than `max_age` ago. Returns how many went.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(max_age, Utc::now())
    }

    /// [`ErrorAggregator::cleanup`] with an explicit clock.
    pub fn cleanup_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_occurrence >= cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "Error aggregator cleanup");
        }
        evicted
    }

    /// Number of distinct entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn log_error(error: &StructuredError, count: u64) {
    let ctx = error.context();
    let request_id = ctx.request_id.as_deref().unwrap_or("-");
    let method = ctx.method.as_deref().unwrap_or("-");
    let url = ctx.url.as_deref().unwrap_or("-");
    let cause = error.cause().unwrap_or("");

    match error.severity() {
        Severity::Critical | Severity::High => tracing::error!(
            request_id,
            http.method = method,
            http.path = url,
            error.code = error.code(),
            error.category = error.category().as_str(),
            error.severity = error.severity().as_str(),
            error.cause = cause,
            count,
            "{}",
            error.message()
        ),
        Severity::Medium => tracing::warn!(
            request_id,
            http.method = method,
            http.path = url,
            error.code = error.code(),
            error.category = error.category().as_str(),
            error.severity = error.severity().as_str(),
            count,
            "{}",
            error.message()
        ),
        Severity::Low => tracing::info!(
            request_id,
            http.method = method,
            http.path = url,
            error.code = error.code(),
            error.category = error.category().as_str(),
            error.severity = error.severity().as_str(),
            count,
            "{}",
            error.message()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_same_pair_counts_up() {
        let aggregator = ErrorAggregator::new();
        let err = StructuredError::storage("connection refused");
        for i in 0..5 {
            aggregator.track_at(&err, at(i));
        }

        let entry = aggregator.get("DATABASE_ERROR", "connection refused").unwrap();
        assert_eq!(entry.count, 5);
        assert_eq!(entry.first_occurrence, at(0));
        assert_eq!(entry.last_occurrence, at(4));
        assert_eq!(entry.error_key, "DATABASE_ERROR:connection refused");
    }

    #[test]
    fn test_distinct_pairs_are_independent() {
        let aggregator = ErrorAggregator::new();
        aggregator.track_at(&StructuredError::validation("bad email"), at(0));
        aggregator.track_at(&StructuredError::validation("bad phone"), at(1));
        aggregator.track_at(&StructuredError::validation("bad email"), at(2));

        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.get("VALIDATION_ERROR", "bad email").unwrap().count, 2);
        assert_eq!(aggregator.get("VALIDATION_ERROR", "bad phone").unwrap().count, 1);
    }

    #[test]
    fn test_stats_buckets() {
        let aggregator = ErrorAggregator::new();
        aggregator.track(&StructuredError::validation("a"));
        aggregator.track(&StructuredError::validation("a"));
        aggregator.track(&StructuredError::system("b"));

        let stats = aggregator.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity[&Severity::Low], 2);
        assert_eq!(stats.by_severity[&Severity::Critical], 1);
        assert_eq!(stats.by_category[&ErrorCategory::Validation], 2);
        assert_eq!(stats.by_category[&ErrorCategory::System], 1);
    }

    #[test]
    fn test_top_n_sorted_with_stable_ties() {
        let aggregator = ErrorAggregator::with_top_n(3);
        aggregator.track(&StructuredError::not_found("first"));
        aggregator.track(&StructuredError::not_found("second"));
        aggregator.track(&StructuredError::not_found("third"));
        aggregator.track(&StructuredError::not_found("fourth"));
        aggregator.track(&StructuredError::not_found("fourth"));

        let top: Vec<_> = aggregator
            .stats()
            .top_errors
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(top, vec!["fourth", "first", "second"]);
    }

    #[test]
    fn test_cleanup_evicts_stale_entries() {
        let aggregator = ErrorAggregator::new();
        aggregator.track_at(&StructuredError::network("old"), at(0));
        aggregator.track_at(&StructuredError::network("fresh"), at(100));

        let evicted = aggregator.cleanup_at(Duration::from_secs(50), at(120));
        assert_eq!(evicted, 1);
        assert!(aggregator.get("NETWORK_ERROR", "old").is_none());
        assert!(aggregator.get("NETWORK_ERROR", "fresh").is_some());
    }

    #[test]
    fn test_repeat_keeps_entry_alive() {
        let aggregator = ErrorAggregator::new();
        let err = StructuredError::network("flaky");
        aggregator.track_at(&err, at(0));
        aggregator.track_at(&err, at(100));
        assert_eq!(aggregator.cleanup_at(Duration::from_secs(50), at(120)), 0);
    }

    #[test]
    fn test_clear() {
        let aggregator = ErrorAggregator::new();
        aggregator.track(&StructuredError::system("x"));
        aggregator.clear();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.stats().total, 0);
    }

    #[test]
    fn test_stats_serialize() {
        let aggregator = ErrorAggregator::new();
        aggregator.track(&StructuredError::authentication("expired"));
        let json = serde_json::to_value(aggregator.stats()).unwrap();
        assert_eq!(json["bySeverity"]["medium"], 1);
        assert_eq!(json["byCategory"]["authentication"], 1);
        assert_eq!(json["topErrors"][0]["errorKey"], "AUTHENTICATION_ERROR:expired");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tracking_is_exact() {
        let aggregator = Arc::new(ErrorAggregator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    aggregator.track(&StructuredError::storage("timeout"));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(aggregator.get("DATABASE_ERROR", "timeout").unwrap().count, 2_000);
    }
}
