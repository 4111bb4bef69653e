//! Application composition from configuration.
//!
//! [`App`] turns a [`KeystoneConfig`] into a [`Router`] whose global chain is
//!
//! ```text
//! error handler -> timeout -> api rate limit
//! ```
//!
//! and keeps the login, registration and password reset limiters around so
//! routes can opt into them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keystone_config::{ConfigLoader, KeystoneConfig, LimiterConfig, RateLimitsConfig, DEFAULT_ENV_PREFIX};
use keystone_middleware::{
    BoxedMiddleware, ErrorHandlerMiddleware, RateLimitMiddleware, RateLimitPolicy, RateLimiter,
    TimeoutMiddleware,
};
use keystone_telemetry::ErrorAggregator;
use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::router::Router;
use crate::server::Server;
use crate::shutdown::ShutdownSignal;

/// The four configured rate limiters.
#[derive(Debug, Clone)]
pub struct Limiters {
    /// Login attempts, keyed by ip and email.
    pub login: Arc<RateLimiter>,
    /// Registrations, keyed by ip.
    pub register: Arc<RateLimiter>,
    /// Password reset requests, keyed by ip and email.
    pub password_reset: Arc<RateLimiter>,
    /// General traffic, keyed by ip and principal.
    pub api: Arc<RateLimiter>,
}

impl Limiters {
    /// Builds the limiters from their config sections.
    #[must_use]
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        let interval = config.cleanup_interval;
        Self {
            login: Arc::new(RateLimiter::login(policy(&config.login)).with_cleanup_interval(interval)),
            register: Arc::new(
                RateLimiter::register(policy(&config.register)).with_cleanup_interval(interval),
            ),
            password_reset: Arc::new(
                RateLimiter::password_reset(policy(&config.password_reset))
                    .with_cleanup_interval(interval),
            ),
            api: Arc::new(RateLimiter::api(policy(&config.api)).with_cleanup_interval(interval)),
        }
    }

    fn all(&self) -> [&Arc<RateLimiter>; 4] {
        [&self.login, &self.register, &self.password_reset, &self.api]
    }

    /// Sweeps every limiter. Returns the number of keys removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        self.all().iter().map(|limiter| limiter.cleanup_at(now)).sum()
    }
}

fn policy(config: &LimiterConfig) -> RateLimitPolicy {
    RateLimitPolicy::new(config.window(), config.max_attempts, config.block_duration())
}

/// A configured application: router, aggregator and limiters.
///
/// ```
/// use http::{Method, StatusCode};
/// use keystone_config::KeystoneConfig;
/// use keystone_core::{Request, Response};
/// use keystone_server::App;
///
/// # tokio_test::block_on(async {
/// let mut app = App::new(KeystoneConfig::default()).unwrap();
/// let login_limit = app.login_limit();
/// app.router_mut().register(Method::POST, "/auth/login", vec![login_limit], |_req: Request| async {
///     Ok(Response::ok(serde_json::json!({ "token": "t" })))
/// });
///
/// let response = app
///     .router()
///     .dispatch(Request::new(Method::GET, "/missing").with_ip("198.51.100.1"))
///     .await
///     .unwrap();
/// assert_eq!(response.status(), StatusCode::NOT_FOUND);
/// assert_eq!(app.aggregator().stats().total, 1);
/// # });
/// ```
#[derive(Debug)]
pub struct App {
    config: KeystoneConfig,
    aggregator: Arc<ErrorAggregator>,
    limiters: Limiters,
    router: Router,
}

impl App {
    /// Validates `config` and installs the global chain.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the configuration is invalid.
    pub fn new(config: KeystoneConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let aggregator = Arc::new(ErrorAggregator::with_top_n(config.errors.top_n));
        let limiters = Limiters::from_config(&config.rate_limits);

        let mut router = Router::new();
        router
            .use_middleware(
                ErrorHandlerMiddleware::new(Arc::clone(&aggregator))
                    .expose_internal_errors(config.errors.expose_internal_errors),
            )
            .use_middleware(TimeoutMiddleware::new(config.server.request_timeout()));
        if config.rate_limits.enabled {
            router.use_middleware(RateLimitMiddleware::new(Arc::clone(&limiters.api)));
        }

        tracing::debug!(
            global = ?router.global_middleware_names(),
            rate_limits = config.rate_limits.enabled,
            "Application composed"
        );

        Ok(Self {
            config,
            aggregator,
            limiters,
            router,
        })
    }

    /// Loads configuration from `path` (if it exists), `.env` and
    /// `KEYSTONE__*` variables, then builds the app.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if loading or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let config = ConfigLoader::new()
            .with_optional_file(path)?
            .with_dotenv()?
            .with_env_prefix(DEFAULT_ENV_PREFIX)
            .load()?;
        Self::new(config)
    }

    /// Installs the logging subscriber and registers metric descriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Telemetry`] if a global subscriber is already set
    /// or the level directives do not parse.
    pub fn init_telemetry(&self) -> Result<(), ServerError> {
        keystone_telemetry::init_logging(&self.config.logging.to_log_config())?;
        keystone_telemetry::metrics::describe_metrics();
        Ok(())
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    /// The shared error aggregator.
    #[must_use]
    pub const fn aggregator(&self) -> &Arc<ErrorAggregator> {
        &self.aggregator
    }

    /// The configured limiters.
    #[must_use]
    pub const fn limiters(&self) -> &Limiters {
        &self.limiters
    }

    /// The router.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// The router, for registering routes.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Route stage for login endpoints.
    #[must_use]
    pub fn login_limit(&self) -> BoxedMiddleware {
        Arc::new(
            RateLimitMiddleware::new(Arc::clone(&self.limiters.login))
                .with_message("Too many login attempts, please try again later"),
        )
    }

    /// Route stage for registration endpoints.
    #[must_use]
    pub fn register_limit(&self) -> BoxedMiddleware {
        Arc::new(
            RateLimitMiddleware::new(Arc::clone(&self.limiters.register))
                .with_message("Too many registration attempts, please try again later"),
        )
    }

    /// Route stage for password reset endpoints.
    #[must_use]
    pub fn password_reset_limit(&self) -> BoxedMiddleware {
        Arc::new(
            RateLimitMiddleware::new(Arc::clone(&self.limiters.password_reset))
                .with_message("Too many password reset requests, please try again later"),
        )
    }

    /// Evicts stale aggregator entries and limiter keys once.
    pub fn cleanup(&self) -> (usize, usize) {
        let errors = self.aggregator.cleanup(self.config.errors.aggregator_max_age());
        let keys = self.limiters.cleanup();
        (errors, keys)
    }

    /// Runs [`App::cleanup`] every `every` until `shutdown` fires.
    #[must_use]
    pub fn spawn_cleanup(&self, every: Duration, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let aggregator = Arc::clone(&self.aggregator);
        let limiters = self.limiters.clone();
        let max_age = self.config.errors.aggregator_max_age();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let errors = aggregator.cleanup(max_age);
                        let keys = limiters.cleanup();
                        tracing::debug!(errors, keys, "Periodic cleanup");
                    }
                    () = shutdown.wait() => break,
                }
            }
        })
    }

    /// Takes the composed router.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Hands the router to an HTTP server.
    #[must_use]
    pub fn into_server(self) -> Server {
        Server::new(self.router, self.config.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use keystone_core::{Request, Response};

    fn tight(config: &mut KeystoneConfig) {
        config.rate_limits.login = LimiterConfig {
            window_ms: 60_000,
            max_attempts: 2,
            block_duration_ms: 60_000,
        };
    }

    #[test]
    fn test_global_chain_order() {
        let app = App::new(KeystoneConfig::default()).unwrap();
        assert_eq!(
            app.router().global_middleware_names(),
            ["error_handler", "timeout", "rate_limit"]
        );

        let mut config = KeystoneConfig::default();
        config.rate_limits.enabled = false;
        let app = App::new(config).unwrap();
        assert_eq!(app.router().global_middleware_names(), ["error_handler", "timeout"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = KeystoneConfig::default();
        config.server.request_timeout_ms = 0;
        assert!(matches!(App::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_login_limit_per_email() {
        let mut config = KeystoneConfig::default();
        tight(&mut config);
        let mut app = App::new(config).unwrap();
        let limit = app.login_limit();
        app.router_mut()
            .register(Method::POST, "/auth/login", vec![limit], |_req: Request| async {
                Ok(Response::ok(serde_json::json!({ "token": "t" })))
            });

        let login = |email: &str| {
            Request::new(Method::POST, "/auth/login")
                .with_ip("198.51.100.4")
                .with_body(serde_json::json!({ "email": email }))
        };

        for _ in 0..2 {
            let ok = app.router().dispatch(login("ana@example.com")).await.unwrap();
            assert_eq!(ok.status(), StatusCode::OK);
        }
        let blocked = app.router().dispatch(login("ANA@example.com ")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
        let error = blocked.envelope().error.as_ref().unwrap();
        assert_eq!(error.message, "Too many login attempts, please try again later");

        let other = app.router().dispatch(login("ben@example.com")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
        assert_eq!(app.limiters().login.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_state() {
        let app = App::new(KeystoneConfig::default()).unwrap();
        app.router()
            .dispatch(Request::new(Method::GET, "/nope").with_ip("192.0.2.9"))
            .await
            .unwrap();
        assert_eq!(app.aggregator().len(), 1);
        assert_eq!(app.limiters().api.len(), 1);

        assert_eq!(app.cleanup(), (0, 0));
        assert_eq!(app.aggregator().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_cleanup_stops_on_shutdown() {
        let app = App::new(KeystoneConfig::default()).unwrap();
        let shutdown = ShutdownSignal::new();
        let task = app.spawn_cleanup(Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.trigger();
        task.await.unwrap();
    }
}
