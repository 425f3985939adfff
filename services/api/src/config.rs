//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

use edulab_core::presentation::DEFAULT_RECENT_LIMIT;

/// Upper bound on the number of recent experiments a dashboard may request.
pub const MAX_RECENT_LIMIT: usize = 20;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which backend the service talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// The hosted Postgres database and its notification channel.
    Postgres { database_url: String },
    /// In-process tables with the file-backed mock identity.
    Local { store_path: PathBuf },
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(Backend::Postgres {
                database_url: String::new(),
            }),
            "local" => Ok(Backend::Local {
                store_path: PathBuf::new(),
            }),
            other => Err(format!("'{}' is not one of postgres, local", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend: Backend,
    pub log_level: Level,
    pub recent_experiments_limit: usize,
    pub login_path: String,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Backend Settings ---
        let backend_str = var("EDULAB_BACKEND").unwrap_or_else(|| "postgres".to_string());
        let backend = match backend_str
            .parse::<Backend>()
            .map_err(|e| ConfigError::InvalidValue("EDULAB_BACKEND".to_string(), e))?
        {
            Backend::Postgres { .. } => Backend::Postgres {
                database_url: var("DATABASE_URL")
                    .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?,
            },
            Backend::Local { .. } => Backend::Local {
                store_path: var("LOCAL_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./edulab_local.json")),
            },
        };

        // --- Load Dashboard Settings ---
        let recent_experiments_limit = match var("RECENT_EXPERIMENTS_LIMIT") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_RECENT_LIMIT).contains(n))
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "RECENT_EXPERIMENTS_LIMIT".to_string(),
                        format!("'{}' is not a number between 1 and {}", raw, MAX_RECENT_LIMIT),
                    )
                })?,
            None => DEFAULT_RECENT_LIMIT,
        };

        let login_path = var("LOGIN_PATH").unwrap_or_else(|| "/login".to_string());
        let cors_origin =
            var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            backend,
            log_level,
            recent_experiments_limit,
            login_path,
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "DATABASE_URL"));
    }

    #[test]
    fn defaults_for_local_backend() {
        let config = Config::from_lookup(lookup(&[("EDULAB_BACKEND", "local")])).unwrap();
        assert_eq!(
            config.backend,
            Backend::Local {
                store_path: PathBuf::from("./edulab_local.json")
            }
        );
        assert_eq!(config.recent_experiments_limit, 4);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn rejects_out_of_range_limit() {
        let err = Config::from_lookup(lookup(&[
            ("EDULAB_BACKEND", "local"),
            ("RECENT_EXPERIMENTS_LIMIT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue(ref v, _) if v == "RECENT_EXPERIMENTS_LIMIT"
        ));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = Config::from_lookup(lookup(&[("EDULAB_BACKEND", "firebase")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "EDULAB_BACKEND"));
    }
}
