use std::path::PathBuf;
use std::time::Duration;

use atoma_constants::coordination::DEFAULT_LEASE_GRANT_MAX_ATTEMPTS;
use atoma_constants::coordination::DEFAULT_LEASE_TTL_MS;
use atoma_constants::coordination::DEFAULT_RENEWAL_DIVISOR;
use atoma_constants::coordination::MAX_CONSECUTIVE_STORE_FAILURES;
use atoma_constants::coordination::MAX_LEASE_TTL_MS;
use atoma_constants::coordination::MAX_RENEWAL_DIVISOR;
use atoma_constants::coordination::MIN_LEASE_TTL_MS;
use atoma_constants::coordination::POLL_INITIAL_BACKOFF_MS;
use atoma_constants::coordination::POLL_MAX_BACKOFF_MS;
use atoma_constants::coordination::STORE_RETRY_INITIAL_BACKOFF_MS;
use atoma_constants::coordination::STORE_RETRY_MAX_BACKOFF_MS;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

/// Tuning for an [`AtomaClient`](crate::AtomaClient).
///
/// Configuration is loaded in layers with the following precedence (lowest to highest):
/// 1. Built-in defaults
/// 2. Environment variables (ATOMA_*)
/// 3. TOML configuration file
///
/// Later layers are applied with [`merge`](Self::merge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomaConfig {
    /// TTL used by `grant_default_lease`, in milliseconds.
    #[serde(default = "default_lease_ttl_ms")]
    pub default_lease_ttl_ms: u64,

    /// Leases are renewed every `ttl / renewal_divisor`.
    #[serde(default = "default_renewal_divisor")]
    pub renewal_divisor: u32,

    /// First wait between grant evaluations of a blocked contender.
    #[serde(default = "default_poll_initial_backoff_ms")]
    pub poll_initial_backoff_ms: u64,

    /// Cap on the wait between grant evaluations.
    #[serde(default = "default_poll_max_backoff_ms")]
    pub poll_max_backoff_ms: u64,

    /// First backoff after a transient store failure.
    #[serde(default = "default_store_retry_initial_backoff_ms")]
    pub store_retry_initial_backoff_ms: u64,

    /// Cap on the backoff after transient store failures.
    #[serde(default = "default_store_retry_max_backoff_ms")]
    pub store_retry_max_backoff_ms: u64,

    /// Consecutive store failures tolerated before `StoreUnavailable` surfaces.
    #[serde(default = "default_max_consecutive_store_failures")]
    pub max_consecutive_store_failures: u32,

    /// Attempts to write a new lease record before `grant_lease` fails.
    #[serde(default = "default_lease_grant_max_attempts")]
    pub lease_grant_max_attempts: u32,
}

impl Default for AtomaConfig {
    fn default() -> Self {
        Self {
            default_lease_ttl_ms: default_lease_ttl_ms(),
            renewal_divisor: default_renewal_divisor(),
            poll_initial_backoff_ms: default_poll_initial_backoff_ms(),
            poll_max_backoff_ms: default_poll_max_backoff_ms(),
            store_retry_initial_backoff_ms: default_store_retry_initial_backoff_ms(),
            store_retry_max_backoff_ms: default_store_retry_max_backoff_ms(),
            max_consecutive_store_failures: default_max_consecutive_store_failures(),
            lease_grant_max_attempts: default_lease_grant_max_attempts(),
        }
    }
}

impl AtomaConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables follow the pattern ATOMA_<FIELD_NAME> (uppercase).
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        Self {
            default_lease_ttl_ms: parse_env("ATOMA_DEFAULT_LEASE_TTL_MS").unwrap_or_else(default_lease_ttl_ms),
            renewal_divisor: parse_env("ATOMA_RENEWAL_DIVISOR").unwrap_or_else(default_renewal_divisor),
            poll_initial_backoff_ms: parse_env("ATOMA_POLL_INITIAL_BACKOFF_MS")
                .unwrap_or_else(default_poll_initial_backoff_ms),
            poll_max_backoff_ms: parse_env("ATOMA_POLL_MAX_BACKOFF_MS").unwrap_or_else(default_poll_max_backoff_ms),
            store_retry_initial_backoff_ms: parse_env("ATOMA_STORE_RETRY_INITIAL_BACKOFF_MS")
                .unwrap_or_else(default_store_retry_initial_backoff_ms),
            store_retry_max_backoff_ms: parse_env("ATOMA_STORE_RETRY_MAX_BACKOFF_MS")
                .unwrap_or_else(default_store_retry_max_backoff_ms),
            max_consecutive_store_failures: parse_env("ATOMA_MAX_CONSECUTIVE_STORE_FAILURES")
                .unwrap_or_else(default_max_consecutive_store_failures),
            lease_grant_max_attempts: parse_env("ATOMA_LEASE_GRANT_MAX_ATTEMPTS")
                .unwrap_or_else(default_lease_grant_max_attempts),
        }
    }

    /// Merge configuration from another source.
    ///
    /// Fields in `other` that differ from the defaults override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.default_lease_ttl_ms != default_lease_ttl_ms() {
            self.default_lease_ttl_ms = other.default_lease_ttl_ms;
        }
        if other.renewal_divisor != default_renewal_divisor() {
            self.renewal_divisor = other.renewal_divisor;
        }
        if other.poll_initial_backoff_ms != default_poll_initial_backoff_ms() {
            self.poll_initial_backoff_ms = other.poll_initial_backoff_ms;
        }
        if other.poll_max_backoff_ms != default_poll_max_backoff_ms() {
            self.poll_max_backoff_ms = other.poll_max_backoff_ms;
        }
        if other.store_retry_initial_backoff_ms != default_store_retry_initial_backoff_ms() {
            self.store_retry_initial_backoff_ms = other.store_retry_initial_backoff_ms;
        }
        if other.store_retry_max_backoff_ms != default_store_retry_max_backoff_ms() {
            self.store_retry_max_backoff_ms = other.store_retry_max_backoff_ms;
        }
        if other.max_consecutive_store_failures != default_max_consecutive_store_failures() {
            self.max_consecutive_store_failures = other.max_consecutive_store_failures;
        }
        if other.lease_grant_max_attempts != default_lease_grant_max_attempts() {
            self.lease_grant_max_attempts = other.lease_grant_max_attempts;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_LEASE_TTL_MS..=MAX_LEASE_TTL_MS).contains(&self.default_lease_ttl_ms) {
            return Err(ConfigError::Validation {
                message: format!("default_lease_ttl_ms must be within {MIN_LEASE_TTL_MS}..={MAX_LEASE_TTL_MS}"),
            });
        }

        if !(2..=MAX_RENEWAL_DIVISOR).contains(&self.renewal_divisor) {
            return Err(ConfigError::Validation {
                message: format!("renewal_divisor must be within 2..={MAX_RENEWAL_DIVISOR}"),
            });
        }

        if self.poll_initial_backoff_ms == 0 || self.poll_initial_backoff_ms > self.poll_max_backoff_ms {
            return Err(ConfigError::Validation {
                message: "poll_initial_backoff_ms must be non-zero and at most poll_max_backoff_ms".into(),
            });
        }

        if self.store_retry_initial_backoff_ms == 0
            || self.store_retry_initial_backoff_ms > self.store_retry_max_backoff_ms
        {
            return Err(ConfigError::Validation {
                message: "store_retry_initial_backoff_ms must be non-zero and at most store_retry_max_backoff_ms"
                    .into(),
            });
        }

        if self.max_consecutive_store_failures == 0 {
            return Err(ConfigError::Validation {
                message: "max_consecutive_store_failures must be non-zero".into(),
            });
        }

        if self.lease_grant_max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "lease_grant_max_attempts must be non-zero".into(),
            });
        }

        Ok(())
    }

    /// TTL used by `grant_default_lease`.
    pub fn default_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.default_lease_ttl_ms)
    }
}

// Default value functions

fn default_lease_ttl_ms() -> u64 {
    DEFAULT_LEASE_TTL_MS
}

fn default_renewal_divisor() -> u32 {
    DEFAULT_RENEWAL_DIVISOR
}

fn default_poll_initial_backoff_ms() -> u64 {
    POLL_INITIAL_BACKOFF_MS
}

fn default_poll_max_backoff_ms() -> u64 {
    POLL_MAX_BACKOFF_MS
}

fn default_store_retry_initial_backoff_ms() -> u64 {
    STORE_RETRY_INITIAL_BACKOFF_MS
}

fn default_store_retry_max_backoff_ms() -> u64 {
    STORE_RETRY_MAX_BACKOFF_MS
}

fn default_max_consecutive_store_failures() -> u32 {
    MAX_CONSECUTIVE_STORE_FAILURES
}

fn default_lease_grant_max_attempts() -> u32 {
    DEFAULT_LEASE_GRANT_MAX_ATTEMPTS
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
