//! Layered settings: CLI flags over environment over `pgcheck.toml`.
//!
//! The TOML file is optional. Its values are keyed by the same names as
//! the environment variables, so both library crates resolve everything
//! through one lookup function.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use pgcheck_probe::config as probe_env;
use pgcheck_store::config as store_env;
use serde::{Deserialize, Serialize};

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub database: Option<DatabaseSection>,
    pub probe: Option<ProbeSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Seconds.
    pub connect_timeout: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSection {
    pub instance_id: Option<String>,
    /// Seconds, fractions allowed.
    pub update_interval: Option<f64>,
    pub reconnect_settle_delay: Option<f64>,
    pub reconnect_attempt_delay: Option<f64>,
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_resume_delay: Option<f64>,
    pub startup_delay: Option<f64>,
    pub startup_max_attempts: Option<u32>,
    pub startup_retry_delay: Option<f64>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FileConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Flatten into environment-variable keys.
    pub fn to_env_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        let mut put = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(key, value);
            }
        };

        if let Some(db) = &self.database {
            put(store_env::ENV_HOST, db.host.clone());
            put(store_env::ENV_PORT, db.port.map(|p| p.to_string()));
            put(store_env::ENV_DATABASE, db.name.clone());
            put(store_env::ENV_USER, db.user.clone());
            put(store_env::ENV_PASSWORD, db.password.clone());
            put(store_env::ENV_CONNECT_TIMEOUT, db.connect_timeout.map(|s| s.to_string()));
        }
        if let Some(probe) = &self.probe {
            put(probe_env::ENV_INSTANCE_ID, probe.instance_id.clone());
            put(probe_env::ENV_UPDATE_INTERVAL, probe.update_interval.map(|s| s.to_string()));
            put(
                probe_env::ENV_RECONNECT_SETTLE_DELAY,
                probe.reconnect_settle_delay.map(|s| s.to_string()),
            );
            put(
                probe_env::ENV_RECONNECT_ATTEMPT_DELAY,
                probe.reconnect_attempt_delay.map(|s| s.to_string()),
            );
            put(
                probe_env::ENV_RECONNECT_MAX_ATTEMPTS,
                probe.reconnect_max_attempts.map(|n| n.to_string()),
            );
            put(
                probe_env::ENV_RECONNECT_RESUME_DELAY,
                probe.reconnect_resume_delay.map(|s| s.to_string()),
            );
            put(probe_env::ENV_STARTUP_DELAY, probe.startup_delay.map(|s| s.to_string()));
            put(
                probe_env::ENV_STARTUP_MAX_ATTEMPTS,
                probe.startup_max_attempts.map(|n| n.to_string()),
            );
            put(
                probe_env::ENV_STARTUP_RETRY_DELAY,
                probe.startup_retry_delay.map(|s| s.to_string()),
            );
        }
        map
    }
}

/// Resolves a setting: explicit overrides, then the environment, then the file.
pub struct Layers {
    overrides: HashMap<&'static str, String>,
    env: Box<dyn Fn(&str) -> Option<String>>,
    file: HashMap<&'static str, String>,
}

impl Layers {
    pub fn new(file: Option<&FileConfig>) -> Self {
        Self::with_env(file, |key| std::env::var(key).ok())
    }

    pub fn with_env<F>(file: Option<&FileConfig>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        Self {
            overrides: HashMap::new(),
            env: Box::new(env),
            file: file.map(FileConfig::to_env_map).unwrap_or_default(),
        }
    }

    /// Pin `key` to `value`, ahead of every other layer.
    pub fn set(&mut self, key: &'static str, value: Option<String>) {
        if let Some(value) = value {
            self.overrides.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| (self.env)(key))
            .or_else(|| self.file.get(key).cloned())
    }
}
