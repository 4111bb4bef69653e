//! Keyed attempt counting with a blocking penalty.
//!
//! Each key moves through `Fresh -> Counting -> Blocked -> Fresh`:
//!
//! 1. A blocked key is rejected until `blocked_until`, without counting.
//! 2. Once the block has passed, or the window has expired, the key starts
//!    a fresh window with a count of 1.
//! 3. Otherwise the count increments; going past `max_attempts` blocks the
//!    key for `block_duration` and rejects this attempt.
//!
//! Every limiter owns its own state, so one caller can be within budget on
//! the `api` limiter while blocked on `login`.
//!
//! Memory is bounded softly: stale entries are swept every
//! `cleanup_interval` checks, or whenever [`RateLimiter::cleanup_at`] is
//! called. There is no background task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use keystone_core::Request;

/// Checks between access-triggered sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 1_000;

const MINUTE_MS: u64 = 60 * 1_000;

/// Window, budget and penalty of one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Length of a counting window.
    pub window: Duration,
    /// Attempts allowed per window.
    pub max_attempts: u32,
    /// How long a key stays blocked after exceeding the budget.
    pub block_duration: Duration,
}

impl RateLimitPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(window: Duration, max_attempts: u32, block_duration: Duration) -> Self {
        Self {
            window,
            max_attempts,
            block_duration,
        }
    }

    /// Login: 5 attempts per 15 minutes, 30 minute block.
    #[must_use]
    pub const fn login() -> Self {
        Self::new(
            Duration::from_millis(15 * MINUTE_MS),
            5,
            Duration::from_millis(30 * MINUTE_MS),
        )
    }

    /// Registration: 3 attempts per hour, 1 hour block.
    #[must_use]
    pub const fn register() -> Self {
        Self::new(
            Duration::from_millis(60 * MINUTE_MS),
            3,
            Duration::from_millis(60 * MINUTE_MS),
        )
    }

    /// Password reset: 3 attempts per hour, 1 hour block.
    #[must_use]
    pub const fn password_reset() -> Self {
        Self::register()
    }

    /// General API traffic: 1000 requests per 15 minutes, 5 minute block.
    #[must_use]
    pub const fn api() -> Self {
        Self::new(
            Duration::from_millis(15 * MINUTE_MS),
            1_000,
            Duration::from_millis(5 * MINUTE_MS),
        )
    }

    fn window_ms(&self) -> i64 {
        duration_ms(self.window)
    }

    fn block_ms(&self) -> i64 {
        duration_ms(self.block_duration)
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// How a limiter derives the key for a request.
#[derive(Clone, Default)]
pub enum KeyBuilder {
    /// Client address.
    #[default]
    Ip,
    /// Client address plus a lowercased top-level body field, e.g. `email`.
    IpAndBodyField(String),
    /// Client address plus the authenticated principal id.
    IpAndPrincipal,
    /// A header value, falling back to the client address.
    Header(String),
    /// Caller supplied.
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl KeyBuilder {
    /// Builds the key for `request`.
    #[must_use]
    pub fn key(&self, request: &Request) -> String {
        let ip = client_ip(request);
        match self {
            Self::Ip => ip,
            Self::IpAndBodyField(field) => {
                let value = request.body_str(field).unwrap_or_default();
                format!("{ip}:{}", value.trim().to_lowercase())
            }
            Self::IpAndPrincipal => {
                let principal = request.principal().map_or("anonymous", |p| p.id.as_str());
                format!("{ip}:{principal}")
            }
            Self::Header(name) => request
                .header(name)
                .map_or(ip, |value| format!("{name}:{value}")),
            Self::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip => write!(f, "KeyBuilder::Ip"),
            Self::IpAndBodyField(field) => f
                .debug_tuple("KeyBuilder::IpAndBodyField")
                .field(field)
                .finish(),
            Self::IpAndPrincipal => write!(f, "KeyBuilder::IpAndPrincipal"),
            Self::Header(h) => f.debug_tuple("KeyBuilder::Header").field(h).finish(),
            Self::Custom(_) => write!(f, "KeyBuilder::Custom(<fn>)"),
        }
    }
}

/// Client address: the transport-assigned ip, then the first
/// `X-Forwarded-For` entry, then `X-Real-IP`, then `"unknown"`.
#[must_use]
pub fn client_ip(request: &Request) -> String {
    if let Some(ip) = request.ip() {
        return ip.to_string();
    }
    if let Some(first) = request
        .header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return first.to_string();
    }
    request
        .header("x-real-ip")
        .map_or_else(|| "unknown".to_string(), |v| v.trim().to_string())
}

/// The verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the attempt may proceed.
    pub allowed: bool,
    /// Attempts allowed per window.
    pub limit: u32,
    /// Attempts left in the current window.
    pub remaining: u32,
    /// When the window ends, or when the block lifts.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds to wait, rounded up. Only set on rejection.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: i64,
    count: u32,
    blocked_until_ms: Option<i64>,
}

impl Entry {
    const fn fresh(now_ms: i64) -> Self {
        Self {
            window_start_ms: now_ms,
            count: 1,
            blocked_until_ms: None,
        }
    }
}

/// A named, independently stateful limiter.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use keystone_middleware::{KeyBuilder, RateLimitPolicy, RateLimiter};
///
/// let limiter = RateLimiter::new(
///     "login",
///     RateLimitPolicy::new(Duration::from_secs(1), 3, Duration::from_secs(5)),
///     KeyBuilder::Ip,
/// );
///
/// let now = Utc::now();
/// for _ in 0..3 {
///     assert!(limiter.check_key_at("10.0.0.1", now).allowed);
/// }
/// let blocked = limiter.check_key_at("10.0.0.1", now);
/// assert!(!blocked.allowed);
/// assert_eq!(blocked.retry_after_secs, Some(5));
/// ```
pub struct RateLimiter {
    name: String,
    policy: RateLimitPolicy,
    key_builder: KeyBuilder,
    entries: DashMap<String, Entry>,
    checks: AtomicU64,
    cleanup_interval: u64,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: RateLimitPolicy, key_builder: KeyBuilder) -> Self {
        Self {
            name: name.into(),
            policy,
            key_builder,
            entries: DashMap::new(),
            checks: AtomicU64::new(0),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Login limiter keyed by ip and email.
    #[must_use]
    pub fn login(policy: RateLimitPolicy) -> Self {
        Self::new("login", policy, KeyBuilder::IpAndBodyField("email".to_string()))
    }

    /// Registration limiter keyed by ip.
    #[must_use]
    pub fn register(policy: RateLimitPolicy) -> Self {
        Self::new("register", policy, KeyBuilder::Ip)
    }

    /// Password reset limiter keyed by ip and email.
    #[must_use]
    pub fn password_reset(policy: RateLimitPolicy) -> Self {
        Self::new(
            "password_reset",
            policy,
            KeyBuilder::IpAndBodyField("email".to_string()),
        )
    }

    /// General API limiter keyed by ip and principal.
    #[must_use]
    pub fn api(policy: RateLimitPolicy) -> Self {
        Self::new("api", policy, KeyBuilder::IpAndPrincipal)
    }

    /// Sweeps stale entries every `interval` checks. Zero disables sweeping.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: u64) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Limiter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy.
    #[must_use]
    pub const fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Key the limiter would use for `request`.
    #[must_use]
    pub fn key_for(&self, request: &Request) -> String {
        self.key_builder.key(request)
    }

    /// Records an attempt for `request` now.
    pub fn check(&self, request: &Request) -> RateLimitDecision {
        self.check_key_at(&self.key_for(request), Utc::now())
    }

    /// Records an attempt for `key` at `now`.
    pub fn check_key_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        self.maybe_cleanup(now);

        let now_ms = now.timestamp_millis();
        let limit = self.policy.max_attempts;
        let window_ms = self.policy.window_ms();

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                window_start_ms: now_ms,
                count: 0,
                blocked_until_ms: None,
            });

        if let Some(until) = entry.blocked_until_ms {
            if now_ms < until {
                return RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_at: at_ms(until, now),
                    retry_after_secs: Some(ceil_secs(until - now_ms)),
                };
            }
            *entry = Entry::fresh(now_ms);
        } else if entry.count == 0 || now_ms - entry.window_start_ms > window_ms {
            *entry = Entry::fresh(now_ms);
        } else {
            entry.count = entry.count.saturating_add(1);
            if entry.count > limit {
                let until = now_ms.saturating_add(self.policy.block_ms());
                entry.blocked_until_ms = Some(until);
                return RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_at: at_ms(until, now),
                    retry_after_secs: Some(ceil_secs(until - now_ms)),
                };
            }
        }

        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: at_ms(entry.window_start_ms.saturating_add(window_ms), now),
            retry_after_secs: None,
        }
    }

    /// Forgets `key`, e.g. after a successful login.
    pub fn reset(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes entries whose window and block have both expired.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let window_ms = self.policy.window_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let window_live = now_ms - entry.window_start_ms <= window_ms;
            let block_live = entry.blocked_until_ms.is_some_and(|until| now_ms < until);
            window_live || block_live
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(limiter = %self.name, removed, "Rate limiter cleanup");
        }
        removed
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_cleanup(&self, now: DateTime<Utc>) {
        if self.cleanup_interval == 0 {
            return;
        }
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.cleanup_interval == 0 {
            self.cleanup_at(now);
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("key_builder", &self.key_builder)
            .field("keys", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn at_ms(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(fallback)
}

fn ceil_secs(ms: i64) -> u64 {
    u64::try_from(ms.max(0)).unwrap_or(0).div_ceil(1_000)
}
