//! Runtime configuration
//!
//! Defaults are tuned for a short local window in front of the distributed
//! tier. Every field can be overridden from the environment with
//! [`LarderConfig::from_env`] or set directly with the `with_*` builders.

use std::time::Duration;

use crate::error::ConfigError;
use crate::ttl::Ttl;
use crate::RetryPolicy;

// ============================================================================
// LARDER CONFIGURATION
// ============================================================================

/// Configuration shared by the coordinator and its primitives.
#[derive(Debug, Clone, PartialEq)]
pub struct LarderConfig {
    /// TTL for distributed writes that do not name one.
    pub default_ttl: Ttl,

    /// Window for local-tier entries; clamped per write to the distributed TTL.
    pub local_ttl: Ttl,

    /// Default hold time for mutex locks and semaphore slots.
    pub lock_ttl: Duration,

    /// Hold time of the per-key lock taken by `fetch` around the producer.
    pub fetch_lock_ttl: Duration,

    /// How long `fetch` polls for the per-key lock before giving up.
    pub fetch_lock_retry: RetryPolicy,

    /// Prefix of the store key used for the per-key fetch lock.
    pub lock_prefix: String,
}

impl Default for LarderConfig {
    fn default() -> Self {
        Self {
            default_ttl: Ttl::millis(1000),
            local_ttl: Ttl::range_ms(2000, 5000),
            lock_ttl: Duration::from_millis(1000),
            fetch_lock_ttl: Duration::from_millis(5000),
            fetch_lock_retry: RetryPolicy::new(Duration::from_millis(100), 100),
            lock_prefix: "lock:".to_string(),
        }
    }
}

impl LarderConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create LarderConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LARDER_DEFAULT_TTL_MS`: TTL for writes without one (default: 1000)
    /// - `LARDER_LOCAL_TTL_MIN_MS` / `LARDER_LOCAL_TTL_MAX_MS`: local window (default: 2000-5000)
    /// - `LARDER_LOCK_TTL_MS`: mutex and semaphore slot hold time (default: 1000)
    /// - `LARDER_FETCH_LOCK_TTL_MS`: fetch lock hold time (default: 5000)
    /// - `LARDER_FETCH_LOCK_RETRY_INTERVAL_MS`: fetch lock poll interval (default: 100)
    /// - `LARDER_FETCH_LOCK_RETRY_TIMES`: fetch lock attempts (default: 100)
    /// - `LARDER_LOCK_PREFIX`: fetch lock key prefix (default: "lock:")
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_ttl = env_u64("LARDER_DEFAULT_TTL_MS")
            .map(Ttl::millis)
            .unwrap_or(defaults.default_ttl);

        let local_ttl = match (
            env_u64("LARDER_LOCAL_TTL_MIN_MS"),
            env_u64("LARDER_LOCAL_TTL_MAX_MS"),
        ) {
            (None, None) => defaults.local_ttl,
            (min, max) => Ttl::Range {
                min: min.map(Duration::from_millis),
                max: max.map(Duration::from_millis),
            },
        };

        let lock_ttl = env_u64("LARDER_LOCK_TTL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_ttl);

        let fetch_lock_ttl = env_u64("LARDER_FETCH_LOCK_TTL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.fetch_lock_ttl);

        let fetch_lock_retry = RetryPolicy::new(
            env_u64("LARDER_FETCH_LOCK_RETRY_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_lock_retry.interval),
            std::env::var("LARDER_FETCH_LOCK_RETRY_TIMES")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.fetch_lock_retry.times),
        );

        let lock_prefix = std::env::var("LARDER_LOCK_PREFIX").unwrap_or(defaults.lock_prefix);

        Self {
            default_ttl,
            local_ttl,
            lock_ttl,
            fetch_lock_ttl,
            fetch_lock_retry,
            lock_prefix,
        }
    }

    /// Set the default distributed TTL.
    pub fn with_default_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.default_ttl = ttl.into();
        self
    }

    /// Set the local window.
    pub fn with_local_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.local_ttl = ttl.into();
        self
    }

    /// Set the default mutex/slot hold time.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the fetch lock hold time and polling policy.
    pub fn with_fetch_lock(mut self, ttl: Duration, retry: RetryPolicy) -> Self {
        self.fetch_lock_ttl = ttl;
        self.fetch_lock_retry = retry;
        self
    }

    /// Set the fetch lock key prefix.
    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    /// Store key of the per-key lock taken by `fetch`.
    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{}", self.lock_prefix, key)
    }

    /// Reject configurations that would make writes or locks meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ttl("default_ttl", &self.default_ttl)?;
        validate_ttl("local_ttl", &self.local_ttl)?;
        validate_duration("lock_ttl", self.lock_ttl)?;
        validate_duration("fetch_lock_ttl", self.fetch_lock_ttl)?;
        validate_duration("fetch_lock_retry.interval", self.fetch_lock_retry.interval)?;
        if self.fetch_lock_retry.times == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_lock_retry.times".to_string(),
                value: "0".to_string(),
                reason: "must allow at least one attempt".to_string(),
            });
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn validate_duration(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0ms".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_ttl(field: &str, ttl: &Ttl) -> Result<(), ConfigError> {
    match *ttl {
        Ttl::Fixed(d) => validate_duration(field, d),
        Ttl::Range {
            min: Some(min),
            max: Some(max),
        } if min > max => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{}ms..{}ms", min.as_millis(), max.as_millis()),
            reason: "min must not exceed max".to_string(),
        }),
        Ttl::Range { min, max } => {
            if min.or(max).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "{}".to_string(),
                    reason: "range needs at least one bound".to_string(),
                });
            }
            for bound in [min, max].into_iter().flatten() {
                validate_duration(field, bound)?;
            }
            Ok(())
        }
    }
}
