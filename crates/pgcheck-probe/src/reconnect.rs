//! Reconnect bursts.
//!
//! After a store error the probe runs a *burst*: a fixed settle delay,
//! then up to `max_attempts` connect attempts separated by a fixed delay.
//! A burst is always bounded; the probe starts a new one whenever the
//! previous burst ends without a connection, so overall retrying never
//! stops while each burst still logs its own outcome.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

/// Fixed-delay reconnect settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Pause after closing the broken connection (default: 2s).
    pub settle_delay: Duration,
    /// Pause before each connect attempt (default: 3s).
    pub attempt_delay: Duration,
    /// Connect attempts per burst (default: 10).
    pub max_attempts: u32,
    /// Pause after the burst before cycling again (default: 500ms).
    pub resume_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            attempt_delay: Duration::from_secs(3),
            max_attempts: 10,
            resume_delay: Duration::from_millis(500),
        }
    }
}

impl ReconnectPolicy {
    /// No delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            settle_delay: Duration::ZERO,
            attempt_delay: Duration::ZERO,
            max_attempts,
            resume_delay: Duration::ZERO,
        }
    }
}

/// Outcome of one burst.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurstReport {
    /// 1-based burst number over the probe's lifetime.
    pub burst: u64,
    /// Connect attempts made.
    pub attempts: u32,
    /// Attempts that failed.
    pub failures: u32,
    /// Whether a new connection was obtained.
    pub connected: bool,
    /// Whether shutdown cut the burst short.
    pub interrupted: bool,
}

/// Counts attempts within a single burst.
#[derive(Debug)]
pub struct BurstTracker {
    burst: u64,
    attempts: u32,
    failures: u32,
    max_attempts: u32,
    connected: bool,
}

impl BurstTracker {
    pub fn new(burst: u64, policy: &ReconnectPolicy) -> Self {
        Self {
            burst,
            attempts: 0,
            failures: 0,
            max_attempts: policy.max_attempts.max(1),
            connected: false,
        }
    }

    /// Claim the next attempt number, or `None` once the burst is spent
    /// or has already connected.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.connected || self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Record a failed connect for the current attempt.
    pub fn record_failure(&mut self, error: &dyn std::fmt::Display) {
        self.failures += 1;
        warn!(
            burst = self.burst,
            attempt = self.attempts,
            max_attempts = self.max_attempts,
            %error,
            "reconnect attempt failed"
        );
    }

    /// Record a successful connect for the current attempt.
    pub fn record_success(&mut self) {
        self.connected = true;
        debug!(burst = self.burst, attempt = self.attempts, "reconnect attempt succeeded");
    }

    pub fn is_exhausted(&self) -> bool {
        !self.connected && self.attempts >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn report(&self, interrupted: bool) -> BurstReport {
        BurstReport {
            burst: self.burst,
            attempts: self.attempts,
            failures: self.failures,
            connected: self.connected,
            interrupted,
        }
    }
}
