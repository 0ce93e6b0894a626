// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::model::{PoolId, ResourceConfig};
use crate::scheduler::FlightSchedulerConfig;

/// Resource buffer service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL for pools and resources.
    pub database_url: String,
    /// PostgreSQL connection URL for flights.
    pub flight_database_url: String,
    pub scheduler: FlightSchedulerConfig,
    pub max_concurrent_flights: usize,
    /// JSON file with the static pool definitions.
    pub pool_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RBS_DATABASE_URL`: store database
    ///
    /// Optional (with defaults):
    /// - `RBS_FLIGHT_DATABASE_URL`: flight database (default: `RBS_DATABASE_URL`)
    /// - `RBS_SCHEDULER_ENABLED`: run reconciliation cycles (default: true)
    /// - `RBS_FLIGHT_SUBMISSION_PERIOD_SECS`: cycle period (default: 60)
    /// - `RBS_RESOURCE_CREATION_PER_POOL_LIMIT`: creation flights per pool and cycle (default: 10)
    /// - `RBS_RESOURCE_DELETION_PER_POOL_LIMIT`: deletion flights per pool and cycle (default: 10)
    /// - `RBS_MAX_CONCURRENT_FLIGHTS`: flight worker count (default: 32)
    /// - `RBS_POOL_CONFIG_PATH`: pool definitions file (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("RBS_DATABASE_URL").map_err(|_| ConfigError::Missing("RBS_DATABASE_URL"))?;
        let flight_database_url =
            std::env::var("RBS_FLIGHT_DATABASE_URL").unwrap_or_else(|_| database_url.clone());

        let enabled = match std::env::var("RBS_SCHEDULER_ENABLED") {
            Ok(v) => parse_bool(&v)
                .ok_or(ConfigError::Invalid("RBS_SCHEDULER_ENABLED", "must be true or false"))?,
            Err(_) => true,
        };

        let period_secs: u64 = parse_var("RBS_FLIGHT_SUBMISSION_PERIOD_SECS", "60")
            .ok_or(ConfigError::Invalid(
                "RBS_FLIGHT_SUBMISSION_PERIOD_SECS",
                "must be a positive integer",
            ))?;
        if period_secs == 0 {
            return Err(ConfigError::Invalid(
                "RBS_FLIGHT_SUBMISSION_PERIOD_SECS",
                "must be a positive integer",
            ));
        }

        let creation_limit_per_pool: u32 = parse_var("RBS_RESOURCE_CREATION_PER_POOL_LIMIT", "10")
            .ok_or(ConfigError::Invalid(
                "RBS_RESOURCE_CREATION_PER_POOL_LIMIT",
                "must be a non-negative integer",
            ))?;

        let deletion_limit_per_pool: u32 = parse_var("RBS_RESOURCE_DELETION_PER_POOL_LIMIT", "10")
            .ok_or(ConfigError::Invalid(
                "RBS_RESOURCE_DELETION_PER_POOL_LIMIT",
                "must be a non-negative integer",
            ))?;

        let max_concurrent_flights: usize = parse_var("RBS_MAX_CONCURRENT_FLIGHTS", "32")
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "RBS_MAX_CONCURRENT_FLIGHTS",
                "must be a positive integer",
            ))?;

        let pool_config_path = std::env::var("RBS_POOL_CONFIG_PATH").ok().map(PathBuf::from);

        Ok(Self {
            database_url,
            flight_database_url,
            scheduler: FlightSchedulerConfig {
                enabled,
                period: Duration::from_secs(period_secs),
                creation_limit_per_pool,
                deletion_limit_per_pool,
            },
            max_concurrent_flights,
            pool_config_path,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Option<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// One static pool definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub pool_id: PoolId,
    pub size: u32,
    pub resource_config: ResourceConfig,
}

#[derive(Debug, Deserialize)]
struct PoolConfigFile {
    pools: Vec<PoolConfig>,
}

/// Read pool definitions from a JSON file of the form `{"pools": [...]}`.
pub fn load_pool_configs(path: &Path) -> crate::error::Result<Vec<PoolConfig>> {
    let raw = std::fs::read_to_string(path)?;
    let file: PoolConfigFile = serde_json::from_str(&raw)?;
    Ok(file.pools)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 8] = [
        "RBS_DATABASE_URL",
        "RBS_FLIGHT_DATABASE_URL",
        "RBS_SCHEDULER_ENABLED",
        "RBS_FLIGHT_SUBMISSION_PERIOD_SECS",
        "RBS_RESOURCE_CREATION_PER_POOL_LIMIT",
        "RBS_RESOURCE_DELETION_PER_POOL_LIMIT",
        "RBS_MAX_CONCURRENT_FLIGHTS",
        "RBS_POOL_CONFIG_PATH",
    ];

    /// Clears every RBS_ variable, applies `set`, restores on drop.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new(set: &[(&'static str, &str)]) -> Self {
            let saved = VARS.iter().map(|k| (*k, env::var(k).ok())).collect();
            // SAFETY: tests holding ENV_MUTEX are the only env writers.
            unsafe {
                for key in VARS {
                    env::remove_var(key);
                }
                for (key, value) in set {
                    env::set_var(key, value);
                }
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // SAFETY: see EnvGuard::new.
            unsafe {
                for (key, value) in &self.saved {
                    match value {
                        Some(v) => env::set_var(key, v),
                        None => env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[("RBS_DATABASE_URL", "postgres://localhost/rbs")]);

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "postgres://localhost/rbs");
        assert_eq!(config.flight_database_url, "postgres://localhost/rbs");
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.period, Duration::from_secs(60));
        assert_eq!(config.scheduler.creation_limit_per_pool, 10);
        assert_eq!(config.scheduler.deletion_limit_per_pool, 10);
        assert_eq!(config.max_concurrent_flights, 32);
        assert!(config.pool_config_path.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[]);

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("RBS_DATABASE_URL"))
        ));
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new(&[
            ("RBS_DATABASE_URL", "postgres://localhost/rbs"),
            ("RBS_FLIGHT_DATABASE_URL", "postgres://localhost/flights"),
            ("RBS_SCHEDULER_ENABLED", "false"),
            ("RBS_FLIGHT_SUBMISSION_PERIOD_SECS", "5"),
            ("RBS_RESOURCE_CREATION_PER_POOL_LIMIT", "3"),
            ("RBS_RESOURCE_DELETION_PER_POOL_LIMIT", "0"),
            ("RBS_MAX_CONCURRENT_FLIGHTS", "4"),
        ]);

        let config = Config::from_env().unwrap();
        assert_eq!(config.flight_database_url, "postgres://localhost/flights");
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.period, Duration::from_secs(5));
        assert_eq!(config.scheduler.creation_limit_per_pool, 3);
        assert_eq!(config.scheduler.deletion_limit_per_pool, 0);
        assert_eq!(config.max_concurrent_flights, 4);
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();

        let _guard = EnvGuard::new(&[
            ("RBS_DATABASE_URL", "postgres://localhost/rbs"),
            ("RBS_FLIGHT_SUBMISSION_PERIOD_SECS", "0"),
        ]);
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("RBS_FLIGHT_SUBMISSION_PERIOD_SECS", _))
        ));
        drop(_guard);

        let _guard = EnvGuard::new(&[
            ("RBS_DATABASE_URL", "postgres://localhost/rbs"),
            ("RBS_SCHEDULER_ENABLED", "sometimes"),
        ]);
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("RBS_SCHEDULER_ENABLED", _))
        ));
    }

    #[test]
    fn test_load_pool_configs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "pools": [{{
                    "poolId": "ws_v1",
                    "size": 5,
                    "resourceConfig": {{
                        "configName": "ws_v1",
                        "gcpProjectConfig": {{
                            "projectIdPrefix": "ws",
                            "parentFolderId": "123",
                            "billingAccount": "billing-1",
                            "enabledApis": ["compute.googleapis.com"]
                        }}
                    }}
                }}]
            }}"#
        )
        .unwrap();

        let pools = load_pool_configs(file.path()).unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].pool_id, PoolId::new("ws_v1"));
        assert_eq!(pools[0].size, 5);
        assert_eq!(pools[0].resource_config.config_name, "ws_v1");
    }
}
