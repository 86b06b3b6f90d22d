//! StoreConfig: connection settings resolved from the environment.
//!
//! Every setting has a default so the probe can start against a local
//! Postgres with no configuration at all. Resolution goes through a
//! key→value lookup so tests never have to touch the process environment.

use std::fmt;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_DATABASE: &str = "DB_NAME";
pub const ENV_USER: &str = "DB_USERNAME";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_CONNECT_TIMEOUT: &str = "DB_CONNECT_TIMEOUT";

/// Settings for opening a connection to the backend.
#[derive(Clone, PartialEq)]
pub struct StoreConfig {
    /// Backend host (default: "localhost").
    pub host: String,
    /// Backend port (default: 5432).
    pub port: u16,
    /// Database name (default: "postgres").
    pub database: String,
    /// User name (default: "postgres").
    pub user: String,
    /// Password (default: "postgres"). Never printed.
    pub password: String,
    /// Upper bound on a single connect attempt (default: 5s).
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl StoreConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary key→value lookup.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup(ENV_PORT) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| StoreError::Config(format!("{ENV_PORT}={raw:?}: {e}")))?,
            None => defaults.port,
        };

        let connect_timeout = match lookup(ENV_CONNECT_TIMEOUT) {
            Some(raw) => parse_seconds(&raw)
                .map_err(|e| StoreError::Config(format!("{ENV_CONNECT_TIMEOUT}: {e}")))?,
            None => defaults.connect_timeout,
        };

        Ok(Self {
            host: lookup(ENV_HOST).unwrap_or(defaults.host),
            port,
            database: lookup(ENV_DATABASE).unwrap_or(defaults.database),
            user: lookup(ENV_USER).unwrap_or(defaults.user),
            password: lookup(ENV_PASSWORD).unwrap_or(defaults.password),
            connect_timeout,
        })
    }

    /// `user@host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Parse a number of seconds, fractions allowed ("0.1", "2", "1.5").
///
/// Negative, non-finite, and non-numeric values are rejected.
pub fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{raw:?} is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("{raw:?} is not a valid duration"))
}
