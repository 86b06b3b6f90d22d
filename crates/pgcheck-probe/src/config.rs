//! ProbeConfig: identity, cycle interval, and retry budgets.
//!
//! Resolved from environment variables with the same lookup scheme as
//! [`pgcheck_store::StoreConfig`]. The cycle interval is a fractional
//! number of seconds: `UPDATE_INTERVAL=0.1` means 100ms.

use std::time::Duration;

use pgcheck_store::config::parse_seconds;

use crate::error::{ProbeError, ProbeResult};
use crate::reconnect::ReconnectPolicy;

pub const ENV_INSTANCE_ID: &str = "INSTANCE_ID";
pub const ENV_UPDATE_INTERVAL: &str = "UPDATE_INTERVAL";
pub const ENV_RECONNECT_SETTLE_DELAY: &str = "RECONNECT_SETTLE_DELAY";
pub const ENV_RECONNECT_ATTEMPT_DELAY: &str = "RECONNECT_ATTEMPT_DELAY";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "RECONNECT_MAX_ATTEMPTS";
pub const ENV_RECONNECT_RESUME_DELAY: &str = "RECONNECT_RESUME_DELAY";
pub const ENV_STARTUP_DELAY: &str = "STARTUP_DELAY";
pub const ENV_STARTUP_MAX_ATTEMPTS: &str = "STARTUP_MAX_ATTEMPTS";
pub const ENV_STARTUP_RETRY_DELAY: &str = "STARTUP_RETRY_DELAY";

/// Identity used when `INSTANCE_ID` is not set.
pub const DEFAULT_INSTANCE_ID: &str = "unknown";

/// Bounded retry budget for the initial connect + schema setup.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupPolicy {
    /// Slow-start delay before the first attempt (default: 0).
    pub initial_delay: Duration,
    /// Attempts before startup is declared failed (default: 5).
    pub max_attempts: u32,
    /// Delay between failed attempts (default: 3s).
    pub retry_delay: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl StartupPolicy {
    /// No delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_attempts,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Configuration for a single consistency probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Primary key of the counter row (default: "unknown").
    pub instance_id: String,
    /// Pause between cycles (default: 100ms).
    pub interval: Duration,
    /// Reconnect burst settings.
    pub reconnect: ReconnectPolicy,
    /// Startup retry budget.
    pub startup: StartupPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            instance_id: DEFAULT_INSTANCE_ID.to_string(),
            interval: Duration::from_millis(100),
            reconnect: ReconnectPolicy::default(),
            startup: StartupPolicy::default(),
        }
    }
}

impl ProbeConfig {
    /// A config with no delays anywhere, for tests and dry runs.
    pub fn immediate(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            interval: Duration::ZERO,
            reconnect: ReconnectPolicy::immediate(ReconnectPolicy::default().max_attempts),
            startup: StartupPolicy::immediate(StartupPolicy::default().max_attempts),
        }
    }

    /// Resolve the configuration from the process environment.
    pub fn from_env() -> ProbeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary key→value lookup.
    pub fn from_lookup<F>(lookup: F) -> ProbeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let seconds = |key: &str, default: Duration| -> ProbeResult<Duration> {
            match lookup(key) {
                Some(raw) => parse_seconds(&raw).map_err(|e| ProbeError::Config(format!("{key}: {e}"))),
                None => Ok(default),
            }
        };
        let count = |key: &str, default: u32| -> ProbeResult<u32> {
            match lookup(key) {
                Some(raw) => match raw.trim().parse::<u32>() {
                    Ok(0) => Err(ProbeError::Config(format!("{key} must be at least 1"))),
                    Ok(n) => Ok(n),
                    Err(e) => Err(ProbeError::Config(format!("{key}={raw:?}: {e}"))),
                },
                None => Ok(default),
            }
        };

        Ok(Self {
            instance_id: lookup(ENV_INSTANCE_ID).unwrap_or(defaults.instance_id),
            interval: seconds(ENV_UPDATE_INTERVAL, defaults.interval)?,
            reconnect: ReconnectPolicy {
                settle_delay: seconds(ENV_RECONNECT_SETTLE_DELAY, defaults.reconnect.settle_delay)?,
                attempt_delay: seconds(ENV_RECONNECT_ATTEMPT_DELAY, defaults.reconnect.attempt_delay)?,
                max_attempts: count(ENV_RECONNECT_MAX_ATTEMPTS, defaults.reconnect.max_attempts)?,
                resume_delay: seconds(ENV_RECONNECT_RESUME_DELAY, defaults.reconnect.resume_delay)?,
            },
            startup: StartupPolicy {
                initial_delay: seconds(ENV_STARTUP_DELAY, defaults.startup.initial_delay)?,
                max_attempts: count(ENV_STARTUP_MAX_ATTEMPTS, defaults.startup.max_attempts)?,
                retry_delay: seconds(ENV_STARTUP_RETRY_DELAY, defaults.startup.retry_delay)?,
            },
        })
    }
}
