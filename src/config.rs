//! Configuration loading for the governor.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (if provided)
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//! 4. built-in defaults
//!
//! After the file, `HEIMDALL_*` environment variables override individual
//! values (see [`ENV_OVERRIDES`]).
//!
//! ```toml
//! [rate_limit]
//! capacity = 10
//! refill_per_second = 3.0
//!
//! [cache]
//! ttl_seconds = 30
//! max_entries = 100
//!
//! [retry]
//! max_attempts = 3
//! base_delay_seconds = 1.0
//! ```
//!
//! Keys may also be spelled in camelCase (`refillPerSecond`, `ttlSeconds`,
//! `maxEntries`, `maxAttempts`, `baseDelaySeconds`; section `rateLimit`).

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::limiter::RateLimitConfig;
use crate::retry::RetryConfig;
use crate::{HeimdallError, Result};

/// Applies one raw environment value to a config. Arguments are the
/// config, the variable name (for errors) and the raw value.
pub type EnvSetter = fn(&mut GovernorConfig, &str, &str) -> Result<()>;

/// Environment variables that override config values, with their setters.
pub const ENV_OVERRIDES: &[(&str, EnvSetter)] = &[
    ("HEIMDALL_RATE_LIMIT_CAPACITY", |config, var, raw| {
        config.rate_limit.capacity = parse_env(var, raw)?;
        Ok(())
    }),
    ("HEIMDALL_RATE_LIMIT_REFILL_PER_SECOND", |config, var, raw| {
        config.rate_limit.refill_per_second = parse_env(var, raw)?;
        Ok(())
    }),
    ("HEIMDALL_CACHE_TTL_SECONDS", |config, var, raw| {
        config.cache.ttl_seconds = parse_env(var, raw)?;
        Ok(())
    }),
    ("HEIMDALL_CACHE_MAX_ENTRIES", |config, var, raw| {
        config.cache.max_entries = parse_env(var, raw)?;
        Ok(())
    }),
    ("HEIMDALL_RETRY_MAX_ATTEMPTS", |config, var, raw| {
        config.retry.max_attempts = parse_env(var, raw)?;
        Ok(())
    }),
    ("HEIMDALL_RETRY_BASE_DELAY_SECONDS", |config, var, raw| {
        config.retry.base_delay_seconds = parse_env(var, raw)?;
        Ok(())
    }),
];

/// Governor configuration, as read from a file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GovernorConfig {
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitSection {
    /// Bucket capacity in tokens (default: 10).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens per second (default: 3.0).
    #[serde(default = "default_refill", alias = "refillPerSecond")]
    pub refill_per_second: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill(),
        }
    }
}

fn default_capacity() -> u32 {
    10
}

fn default_refill() -> f64 {
    3.0
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheSection {
    /// Entry lifetime in seconds (default: 30).
    #[serde(default = "default_ttl", alias = "ttlSeconds")]
    pub ttl_seconds: f64,
    /// Maximum live entries (default: 100).
    #[serde(default = "default_max_entries", alias = "maxEntries")]
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl() -> f64 {
    30.0
}

fn default_max_entries() -> usize {
    100
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySection {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,
    /// Backoff base in seconds (default: 1.0).
    #[serde(default = "default_base_delay", alias = "baseDelaySeconds")]
    pub base_delay_seconds: f64,
    /// Backoff cap in seconds (default: 30).
    #[serde(default = "default_max_delay", alias = "maxDelaySeconds")]
    pub max_delay_seconds: f64,
    /// Add random jitter to backoff (default: true).
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Jitter bound in seconds (default: 0.25).
    #[serde(default = "default_max_jitter", alias = "maxJitterSeconds")]
    pub max_jitter_seconds: f64,
    /// Per-attempt timeout in seconds (default: none).
    #[serde(default, alias = "attemptTimeoutSeconds")]
    pub attempt_timeout_seconds: Option<f64>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            jitter: default_jitter(),
            max_jitter_seconds: default_max_jitter(),
            attempt_timeout_seconds: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_jitter() -> bool {
    true
}

fn default_max_jitter() -> f64 {
    0.25
}

/// Convert a seconds value from the file, rejecting negative, non-finite or
/// out-of-range input.
fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        HeimdallError::Configuration(format!(
            "{key} must be a non-negative number of seconds, got {value}: {e}"
        ))
    })
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        HeimdallError::Configuration(format!("{var}: cannot parse '{raw}'"))
    })
}

impl GovernorConfig {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first existing standard
    /// location is used, falling back to defaults when there is none.
    /// Environment overrides are applied afterwards.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|var| std::env::var(var).ok())
    }

    /// Read and parse one TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            HeimdallError::Configuration(msg) => {
                HeimdallError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config: {e}"))
        })
    }

    /// Resolve the config file path, if any.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HeimdallError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".heimdall").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/heimdall/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply `HEIMDALL_*` overrides, looking variables up through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        for &(var, apply) in ENV_OVERRIDES {
            if let Some(raw) = lookup(var) {
                apply(&mut self, var, &raw)?;
            }
        }
        Ok(self)
    }

    /// Validated limiter settings.
    pub fn rate_limit_config(&self) -> Result<RateLimitConfig> {
        let config = RateLimitConfig::new()
            .capacity(self.rate_limit.capacity)
            .refill_per_second(self.rate_limit.refill_per_second);
        config.validate()?;
        Ok(config)
    }

    /// Validated cache settings.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        let config = CacheConfig::new()
            .max_entries(self.cache.max_entries)
            .ttl(seconds("cache.ttl_seconds", self.cache.ttl_seconds)?);
        config.validate()?;
        Ok(config)
    }

    /// Validated retry settings.
    pub fn retry_config(&self) -> Result<RetryConfig> {
        let retry = &self.retry;
        let mut config = RetryConfig::new()
            .max_attempts(retry.max_attempts)
            .base_delay(seconds("retry.base_delay_seconds", retry.base_delay_seconds)?)
            .max_delay(seconds("retry.max_delay_seconds", retry.max_delay_seconds)?)
            .jitter(retry.jitter)
            .max_jitter(seconds("retry.max_jitter_seconds", retry.max_jitter_seconds)?);
        if let Some(limit) = retry.attempt_timeout_seconds {
            config = config.attempt_timeout(seconds("retry.attempt_timeout_seconds", limit)?);
        }
        config.validate()?;
        Ok(config)
    }
}
