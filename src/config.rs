//! Client configuration.

use std::{str::FromStr, time::Duration};

use snafu::prelude::*;
use url::Url;

use crate::policy::{PolicyError, ReconnectPolicy};

static DEFAULT_API_BASE: &str = "http://localhost:3001/api/v1";
static STREAM_PATH: &str = "notifications/stream";

/// env var holding the gallery api base url
pub static ENV_API_URL: &str = "GALLERY_API_URL";
/// env var overriding max reconnect attempts
pub static ENV_MAX_ATTEMPTS: &str = "GALLERY_NOTIFY_MAX_ATTEMPTS";
/// env var overriding base reconnect delay, in milliseconds
pub static ENV_BASE_DELAY_MS: &str = "GALLERY_NOTIFY_BASE_DELAY_MS";
/// env var overriding reconnect delay cap, in milliseconds
pub static ENV_MAX_DELAY_MS: &str = "GALLERY_NOTIFY_MAX_DELAY_MS";

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(3000);

/// Error when build client configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConfigError {
    /// url can not be parsed
    #[snafu(display("{s} is an invalid url: {source}"))]
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the stream url schema is not http(s)
    #[snafu(display("the url {s} has invalid schema {schema}, only http or https is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// env var is not a non-negative number
    #[snafu(display("env var {name}={value} is not a valid number: {source}"))]
    InvalidNumber {
        /// env var name
        name: String,
        /// env var value
        value: String,
        /// source error
        source: std::num::ParseIntError,
    },

    /// reconnect policy rejected
    #[snafu(display("invalid reconnect policy: {source}"))]
    InvalidPolicy {
        /// source error
        source: PolicyError,
    },

    /// health check interval is zero
    #[snafu(display("health check interval must be greater than zero"))]
    ZeroHealthCheckInterval,
}

/// Notification client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    stream_url: Url,
    policy: ReconnectPolicy,
    health_check_interval: Duration,
    decorate_toasts: bool,
}

impl ClientConfig {
    /// Use stream url directly
    pub fn new(stream_url: Url) -> Result<Self, ConfigError> {
        ensure!(
            stream_url.scheme() == "http" || stream_url.scheme() == "https",
            error::InvalidSchema {
                s: stream_url.as_str(),
                schema: stream_url.scheme(),
            }
        );

        Ok(Self {
            stream_url,
            policy: ReconnectPolicy::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            decorate_toasts: false,
        })
    }

    /// Derive stream url `{api_base}/notifications/stream` from api base url
    pub fn from_api_base<S: AsRef<str> + ?Sized>(api_base: &S) -> Result<Self, ConfigError> {
        let base = api_base.as_ref().trim_end_matches('/');
        let s = format!("{}/{}", base, STREAM_PATH);
        let url = Url::parse(&s).with_context(|_| error::InvalidURL { s: &s })?;
        Self::new(url)
    }

    /// Read configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = std::env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        log::debug!("Notification api base: {}", base);

        let defaults = ReconnectPolicy::default();
        let max_attempts = env_number::<u32>(ENV_MAX_ATTEMPTS)?
            .unwrap_or_else(|| defaults.max_attempts());
        let base_delay = env_number(ENV_BASE_DELAY_MS)?
            .map(Duration::from_millis)
            .unwrap_or_else(|| defaults.base_delay());
        let max_delay = env_number(ENV_MAX_DELAY_MS)?
            .map(Duration::from_millis)
            .unwrap_or_else(|| defaults.max_delay());

        let policy =
            ReconnectPolicy::new(max_attempts, base_delay, max_delay).context(error::InvalidPolicy)?;

        Ok(Self::from_api_base(&base)?.policy(policy))
    }

    /// set reconnect policy
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// set health check interval
    pub fn health_check_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        ensure!(!interval.is_zero(), error::ZeroHealthCheckInterval);
        self.health_check_interval = interval;
        Ok(self)
    }

    /// prefix toast messages with status icons
    pub fn decorate_toasts(mut self, decorate: bool) -> Self {
        self.decorate_toasts = decorate;
        self
    }

    /// stream url
    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    /// reconnect policy
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// watchdog interval
    pub fn health_check(&self) -> Duration {
        self.health_check_interval
    }

    /// whether toast messages carry status icons
    pub fn decorated(&self) -> bool {
        self.decorate_toasts
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        // the built-in base url is known good
        Self::from_api_base(DEFAULT_API_BASE).unwrap()
    }
}

impl FromStr for ClientConfig {
    type Err = ConfigError;

    /// Parse an api base url
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_api_base(s)
    }
}

fn env_number<N>(name: &str) -> Result<Option<N>, ConfigError>
where
    N: FromStr<Err = std::num::ParseIntError>,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|_| error::InvalidNumber { name, value: &value }),
        Err(_) => Ok(None),
    }
}

/// Run `f` with only the given config env vars set. Env is process global, so
/// calls are serialized.
#[cfg(test)]
pub(crate) fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let names = [ENV_API_URL, ENV_MAX_ATTEMPTS, ENV_BASE_DELAY_MS, ENV_MAX_DELAY_MS];
    for name in names {
        std::env::remove_var(name);
    }
    for (name, value) in vars {
        std::env::set_var(name, value);
    }

    let result = f();

    for name in names {
        std::env::remove_var(name);
    }
    result
}
