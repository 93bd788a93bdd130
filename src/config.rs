//! Configuration handling for the transactor.
//!
//! Two kinds of configuration live here:
//! - [`TransactorConfig`]: how the executor treats lifecycle failures.
//! - [`PoolOptions`]: sqlx pool tuning, parsed from connection URL query parameters.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// What `run` reports when the commit of a successful unit of work fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailurePolicy {
    /// Log the failure and report the unit of work's success.
    #[default]
    Log,
    /// Return `DbError::TransactionCommit` to the caller.
    Propagate,
}

impl fmt::Display for CommitFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Propagate => write!(f, "propagate"),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactorConfig {
    pub commit_failure: CommitFailurePolicy,
}

impl TransactorConfig {
    /// Surface commit failures to the caller instead of only logging them.
    pub fn propagate_commit_failures(mut self) -> Self {
        self.commit_failure = CommitFailurePolicy::Propagate;
        self
    }
}

/// Connection pool configuration options parsed from database URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Pool option keys that we extract from URL query parameters.
    const URL_KEYS: &'static [&'static str] = &[
        "max_connections",
        "min_connections",
        "idle_timeout",
        "acquire_timeout",
        "test_before_acquire",
    ];

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options.
    ///
    /// `min_connections` is checked against the effective maximum, so an
    /// unset `max_connections` falls back to the per-database default.
    pub fn validate(&self, is_sqlite: bool) -> DbResult<()> {
        if self.max_connections == Some(0) {
            return Err(DbError::invalid_configuration(
                "max_connections must be greater than 0",
            ));
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err(DbError::invalid_configuration(
                    "min_connections must be greater than 0",
                ));
            }
            let max = self.max_connections_or_default(is_sqlite);
            if min > max {
                return Err(DbError::invalid_configuration(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Split pool options out of a connection URL.
    ///
    /// Returns the URL with the pool keys removed (other query parameters are
    /// kept for the driver) together with the parsed options.
    pub fn from_url(connection_string: &str) -> DbResult<(String, Self)> {
        let mut url = Url::parse(connection_string).map_err(|e| {
            DbError::invalid_configuration(format!("Invalid connection URL: {e}"))
        })?;
        let mut opts = extract_options(&mut url, Self::URL_KEYS);

        let options = Self {
            max_connections: opts.remove("max_connections").and_then(|v| v.parse().ok()),
            min_connections: opts.remove("min_connections").and_then(|v| v.parse().ok()),
            idle_timeout_secs: opts.remove("idle_timeout").and_then(|v| v.parse().ok()),
            acquire_timeout_secs: opts.remove("acquire_timeout").and_then(|v| v.parse().ok()),
            test_before_acquire: opts.remove("test_before_acquire").and_then(|v| {
                if v.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None // Invalid value ignored
                }
            }),
        };
        options.validate(url.scheme().eq_ignore_ascii_case("sqlite"))?;

        Ok((url.to_string(), options))
    }
}

/// Extract our own options from URL query params, keeping others for the driver.
/// Uses proper URL encoding to preserve special characters in remaining params.
fn extract_options(url: &mut Url, keys: &[&str]) -> HashMap<String, String> {
    let mut opts = HashMap::new();
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            let key_lower = k.to_ascii_lowercase();
            if keys.contains(&key_lower.as_str()) {
                opts.insert(key_lower, v.into_owned());
                None
            } else {
                Some((k.into_owned(), v.into_owned()))
            }
        })
        .collect();

    if remaining.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(remaining);
    }
    opts
}
