//! Runtime configuration: record naming, namespaces, database location and
//! the retry policy used by the plan store.

use std::{env, path::PathBuf, time::Duration};

use backoff::ExponentialBackoff;

use crate::error::{Result, ResultExt};

/// Environment variable naming the plan record.
pub const UPGRADE_CONFIG_ENV: &str = "ROLLER_UPGRADE_CONFIG";
/// Environment variable naming the namespace holding plan records.
pub const NAMESPACE_ENV: &str = "ROLLER_NAMESPACE";
/// Record name used when neither the caller nor the environment supplies one.
pub const DEFAULT_RECORD_NAME: &str = "roller-upgrade";
/// Namespace used when neither the caller nor the environment supplies one.
pub const DEFAULT_NAMESPACE: &str = "kube-system";

/// Resolves the plan record name: explicit value, then
/// `ROLLER_UPGRADE_CONFIG`, then [`DEFAULT_RECORD_NAME`]. Blank values are
/// treated as absent.
pub fn resolve_record_name(explicit: Option<&str>) -> String {
    resolve(explicit, UPGRADE_CONFIG_ENV, DEFAULT_RECORD_NAME)
}

/// Resolves the namespace: explicit value, then `ROLLER_NAMESPACE`, then
/// [`DEFAULT_NAMESPACE`].
pub fn resolve_namespace(explicit: Option<&str>) -> String {
    resolve(explicit, NAMESPACE_ENV, DEFAULT_NAMESPACE)
}

fn resolve(explicit: Option<&str>, var: &str, default: &str) -> String {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| {
            env::var(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| default.to_string())
}

/// Returns the default database path following the XDG Base Directory
/// specification: `$XDG_DATA_HOME/roller/roller.db`.
pub fn default_database_path() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("roller")
        .place_data_file("roller.db")
        .with_context("Failed to resolve data directory")
}

/// Exponential backoff settings for compare-and-swap retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Upper bound on a single delay
    pub max_interval: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Total attempts, the first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay between attempts, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1.0,
            max_attempts,
        }
    }

    /// Builds a fresh backoff schedule. The attempt bound is enforced by the
    /// caller, so elapsed time is unbounded here.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            randomization_factor: 0.1,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}
