//! Delivery policy resolution.
//!
//! Every policy field is resolved independently, in priority order:
//! 1. Explicit non-zero value supplied by the caller ([`PolicyOverrides`])
//! 2. `WEBHOOK_*` environment variable, parsed with the field's type
//! 3. Built-in default
//!
//! An environment value that fails to parse, or that parses to something the
//! field can never hold (a backoff factor of 1, zero workers), is ignored
//! with a warning and the field falls through to its default. Durations take
//! human-readable units (`500ms`, `1m 30s`) or a single fractional unit
//! (`1.5s`, `0.5h`). Startup is
//! never aborted by a bad environment variable; only contradictory final
//! values (initial delay above maximum delay) are rejected.

use std::time::Duration;

use figment::{providers::Env, Figment, Provider};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
};

/// Prefix shared by all delivery environment variables.
pub const ENV_PREFIX: &str = "WEBHOOK_";

/// Immutable delivery policy shared by every component of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    /// Receiving endpoint.
    ///
    /// Environment variable: `WEBHOOK_URL`
    pub url: String,
    /// Maximum delivery attempts per job, initial attempt included.
    ///
    /// Environment variable: `WEBHOOK_MAX_RETRIES`
    pub max_attempts: u32,
    /// Delay before the first retry.
    ///
    /// Environment variable: `WEBHOOK_INITIAL_RETRY_DELAY`
    pub initial_delay: Duration,
    /// Upper bound on the pre-jitter retry delay.
    ///
    /// Environment variable: `WEBHOOK_MAX_RETRY_DELAY`
    pub max_delay: Duration,
    /// Multiplier applied to the delay on each successive retry.
    ///
    /// Environment variable: `WEBHOOK_BACKOFF_FACTOR`
    pub backoff_factor: f64,
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `WEBHOOK_WORKER_COUNT`
    pub worker_count: usize,
    /// Capacity of the pending job queue.
    ///
    /// Environment variable: `WEBHOOK_QUEUE_SIZE`
    pub queue_capacity: usize,
    /// Timeout for a single HTTP attempt.
    ///
    /// Environment variable: `WEBHOOK_TIMEOUT`
    pub timeout: Duration,
    /// Maximum number of jobs waiting on a retry timer at once.
    ///
    /// Environment variable: `WEBHOOK_MAX_PENDING_RETRIES`
    pub max_pending_retries: usize,
    /// How long shutdown waits for workers to finish their current job.
    /// Must exceed [`timeout`](Self::timeout) so an in-flight attempt can
    /// always complete; when unset it defaults to the larger of 30s and twice
    /// the attempt timeout.
    ///
    /// Environment variable: `WEBHOOK_SHUTDOWN_TIMEOUT`
    pub shutdown_timeout: Duration,
    /// Client identifier sent as the `User-Agent` header.
    ///
    /// Environment variable: `WEBHOOK_USER_AGENT`
    pub user_agent: String,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            url: crate::DEFAULT_WEBHOOK_URL.to_string(),
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            initial_delay: crate::DEFAULT_INITIAL_DELAY,
            max_delay: crate::DEFAULT_MAX_DELAY,
            backoff_factor: crate::DEFAULT_BACKOFF_FACTOR,
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            timeout: crate::DEFAULT_TIMEOUT,
            max_pending_retries: crate::DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: crate::DEFAULT_SHUTDOWN_TIMEOUT,
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Values supplied by the code that instantiates the engine.
///
/// `None`, zero and empty values mean "not set" and defer to the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOverrides {
    /// See [`DeliveryPolicy::url`].
    pub url: Option<String>,
    /// See [`DeliveryPolicy::max_attempts`].
    pub max_attempts: Option<u32>,
    /// See [`DeliveryPolicy::initial_delay`].
    pub initial_delay: Option<Duration>,
    /// See [`DeliveryPolicy::max_delay`].
    pub max_delay: Option<Duration>,
    /// See [`DeliveryPolicy::backoff_factor`].
    pub backoff_factor: Option<f64>,
    /// See [`DeliveryPolicy::worker_count`].
    pub worker_count: Option<usize>,
    /// See [`DeliveryPolicy::queue_capacity`].
    pub queue_capacity: Option<usize>,
    /// See [`DeliveryPolicy::timeout`].
    pub timeout: Option<Duration>,
    /// See [`DeliveryPolicy::max_pending_retries`].
    pub max_pending_retries: Option<usize>,
    /// See [`DeliveryPolicy::shutdown_timeout`].
    pub shutdown_timeout: Option<Duration>,
    /// See [`DeliveryPolicy::user_agent`].
    pub user_agent: Option<String>,
}

impl DeliveryPolicy {
    /// Resolves the policy from the process environment and defaults only.
    pub fn from_env() -> Result<Self> {
        Self::resolve(PolicyOverrides::default())
    }

    /// Resolves the policy from caller overrides, the process environment and
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the resolved values
    /// contradict each other or an explicit override is invalid.
    pub fn resolve(overrides: PolicyOverrides) -> Result<Self> {
        Self::resolve_with(overrides, Env::prefixed(ENV_PREFIX))
    }

    /// Resolves the policy against an arbitrary figment provider standing in
    /// for the environment. Keys are the lowercase variable names without the
    /// `WEBHOOK_` prefix.
    pub fn resolve_with(overrides: PolicyOverrides, env: impl Provider) -> Result<Self> {
        let env = EnvLayer { figment: Figment::from(env) };
        let defaults = Self::default();

        // Pending retries default to the queue capacity, whichever way it was set.
        let queue_capacity = pick(
            overrides.queue_capacity,
            || env.lookup::<usize>("queue_size").filter(|v| env.accept("queue_size", *v > 0)),
            defaults.queue_capacity,
        );

        let timeout = pick(overrides.timeout, || env.duration("timeout"), defaults.timeout);

        let policy = Self {
            url: pick(
                overrides.url,
                || env.lookup::<String>("url").filter(|v| env.accept("url", !v.trim().is_empty())),
                defaults.url,
            ),
            max_attempts: pick(
                overrides.max_attempts,
                || env.lookup::<u32>("max_retries"),
                defaults.max_attempts,
            ),
            initial_delay: pick(
                overrides.initial_delay,
                || env.duration("initial_retry_delay"),
                defaults.initial_delay,
            ),
            max_delay: pick(
                overrides.max_delay,
                || env.duration("max_retry_delay"),
                defaults.max_delay,
            ),
            backoff_factor: pick(
                overrides.backoff_factor,
                || {
                    env.lookup::<f64>("backoff_factor")
                        .filter(|v| env.accept("backoff_factor", v.is_finite() && *v > 1.0))
                },
                defaults.backoff_factor,
            ),
            worker_count: pick(
                overrides.worker_count,
                || {
                    env.lookup::<usize>("worker_count")
                        .filter(|v| env.accept("worker_count", *v > 0))
                },
                defaults.worker_count,
            ),
            queue_capacity,
            timeout,
            max_pending_retries: pick(
                overrides.max_pending_retries,
                || {
                    env.lookup::<usize>("max_pending_retries")
                        .filter(|v| env.accept("max_pending_retries", *v > 0))
                },
                queue_capacity,
            ),
            shutdown_timeout: pick(
                overrides.shutdown_timeout,
                || {
                    env.duration("shutdown_timeout")
                        .filter(|v| env.accept("shutdown_timeout", *v > timeout))
                },
                defaults.shutdown_timeout.max(timeout.saturating_mul(2)),
            ),
            user_agent: pick(
                overrides.user_agent,
                || {
                    env.lookup::<String>("user_agent")
                        .filter(|v| env.accept("user_agent", !v.trim().is_empty()))
                },
                defaults.user_agent,
            ),
        };

        policy.validate()?;
        Ok(policy)
    }

    /// Checks the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` naming the first violated
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.url).is_err() {
            return Err(DeliveryError::configuration(format!(
                "webhook url is not a valid absolute URL: {}",
                self.url
            )));
        }

        if !(self.backoff_factor.is_finite() && self.backoff_factor > 1.0) {
            return Err(DeliveryError::configuration("backoff_factor must be greater than 1"));
        }

        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be greater than 0"));
        }

        if self.max_pending_retries == 0 {
            return Err(DeliveryError::configuration(
                "max_pending_retries must be greater than 0",
            ));
        }

        if self.initial_delay > self.max_delay {
            return Err(DeliveryError::configuration(format!(
                "initial_delay ({:?}) cannot exceed max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }

        if self.timeout.is_zero() {
            return Err(DeliveryError::configuration("timeout must be greater than 0"));
        }

        if self.shutdown_timeout <= self.timeout {
            return Err(DeliveryError::configuration(format!(
                "shutdown_timeout ({:?}) must exceed the per-attempt timeout ({:?})",
                self.shutdown_timeout, self.timeout
            )));
        }

        Ok(())
    }

    /// Retry parameters derived from this policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
        }
    }
}

/// Chooses the explicit value when set, then the environment, then the
/// default.
fn pick<T: Unset>(explicit: Option<T>, from_env: impl FnOnce() -> Option<T>, default: T) -> T {
    explicit.filter(|v| !v.is_unset()).or_else(from_env).unwrap_or(default)
}

/// Zero-like values that count as "not supplied".
trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for u32 {
    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl Unset for usize {
    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl Unset for f64 {
    fn is_unset(&self) -> bool {
        *self == 0.0
    }
}

impl Unset for Duration {
    fn is_unset(&self) -> bool {
        self.is_zero()
    }
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.trim().is_empty()
    }
}

/// Typed, fault-tolerant lookups over the environment layer.
struct EnvLayer {
    figment: Figment,
}

impl EnvLayer {
    /// Returns the parsed value, or `None` when the variable is missing or
    /// does not parse as `T`.
    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.figment.find_value(key).ok()?;
        match value.deserialize::<T>() {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                warn!(
                    variable = %variable_name(key),
                    error = %error,
                    "ignoring unparseable environment override"
                );
                None
            },
        }
    }

    /// Durations use human-readable units: `500ms`, `2s`, `1m`, `1h 30m`,
    /// or one fractional unit such as `1.5s`.
    fn duration(&self, key: &str) -> Option<Duration> {
        let raw: String = self.lookup(key)?;
        let parsed = humantime::parse_duration(raw.trim())
            .map_err(|e| e.to_string())
            .or_else(|error| parse_fractional(raw.trim()).ok_or(error));

        match parsed {
            Ok(duration) if !duration.is_zero() => Some(duration),
            Ok(_) => {
                self.accept(key, false);
                None
            },
            Err(error) => {
                warn!(
                    variable = %variable_name(key),
                    value = %raw,
                    error = %error,
                    "ignoring unparseable environment override"
                );
                None
            },
        }
    }

    /// Logs rejected values; returns `valid` unchanged.
    fn accept(&self, key: &str, valid: bool) -> bool {
        if !valid {
            warn!(variable = %variable_name(key), "ignoring out-of-range environment override");
        }
        valid
    }
}

/// Parses a single fractional quantity with a unit, e.g. `1.5s` or `0.25h`.
fn parse_fractional(raw: &str) -> Option<Duration> {
    let split = raw.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    let unit_secs = match unit.trim() {
        "ns" => 1e-9,
        "us" | "µs" => 1e-6,
        "ms" => 1e-3,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(value * unit_secs).ok()
}

fn variable_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_uppercase())
}
