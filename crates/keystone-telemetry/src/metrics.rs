//! Metric counters.
//!
//! Recorded through the `metrics` facade. No exporter is installed here; an
//! application that wants to scrape them installs its own recorder.
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `keystone_errors_total` | `code`, `category`, `severity` |
//! | `keystone_rate_limit_rejections_total` | `limiter` |
//! | `keystone_requests_total` | `status` |

use keystone_core::StructuredError;
use metrics::{counter, describe_counter};

/// Errors tracked by the aggregator.
pub const ERRORS_TOTAL: &str = "keystone_errors_total";
/// Requests rejected by a rate limiter.
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "keystone_rate_limit_rejections_total";
/// Requests dispatched by a router.
pub const REQUESTS_TOTAL: &str = "keystone_requests_total";

/// Registers descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(ERRORS_TOTAL, "Structured errors tracked, by code, category and severity");
    describe_counter!(
        RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected by a rate limiter"
    );
    describe_counter!(REQUESTS_TOTAL, "Requests dispatched, by response status");
}

/// Counts one tracked error.
pub fn record_error(error: &StructuredError) {
    counter!(
        ERRORS_TOTAL,
        "code" => error.code().to_string(),
        "category" => error.category().as_str(),
        "severity" => error.severity().as_str()
    )
    .increment(1);
}

/// Counts one rate-limit rejection.
pub fn record_rate_limit_rejection(limiter: &str) {
    counter!(RATE_LIMIT_REJECTIONS_TOTAL, "limiter" => limiter.to_string()).increment(1);
}

/// Counts one dispatched request.
pub fn record_request(status: u16) {
    counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}
