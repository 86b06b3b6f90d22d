//! ConsistencyProbe: the verify / advance / verify loop.
//!
//! ```text
//!  Disconnected ──start()──▶ Running ──store error──▶ Reconnecting
//!        ▲                     ▲                          │
//!        │                     └──────connected───────────┤
//!        └─────────────────burst exhausted────────────────┘
//! ```
//!
//! The expected value lives only in memory. It starts at 0, advances by
//! one per completed cycle, and survives reconnects untouched: it is never
//! re-read from the store, so a write lost while the connection was down
//! shows up as a violation on the next cycle.

use std::time::Duration;

use pgcheck_store::{Connector, CounterStore, StoreError, StoreResult};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::reconnect::{BurstReport, BurstTracker};
use crate::violation::{Checkpoint, ConsistencyViolation};

/// Connection state of the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// No connection; startup or a spent burst.
    Disconnected,
    /// Connected and cycling.
    Running,
    /// A store error was seen; the handle is being replaced.
    Reconnecting,
}

/// Running totals over the probe's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    /// Cycles that wrote and re-read the next value.
    pub cycles: u64,
    /// Consistency violations reported.
    pub violations: u64,
    /// Store errors that ended a cycle.
    pub store_errors: u64,
    /// Reconnect bursts started.
    pub bursts: u64,
    /// Connect attempts that failed inside bursts.
    pub failed_attempts: u64,
    /// Bursts that ended with a new connection.
    pub reconnects: u64,
}

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Expected value when the cycle began.
    pub expected_before: i64,
    /// Value committed by this cycle, if the write went through.
    pub written: Option<i64>,
    /// Whether the expected value moved forward.
    pub advanced: bool,
    pub violations: Vec<ConsistencyViolation>,
}

impl CycleReport {
    fn new(expected_before: i64) -> Self {
        Self {
            expected_before,
            written: None,
            advanced: false,
            violations: Vec::new(),
        }
    }

    /// Both checks passed and the counter advanced.
    pub fn is_clean(&self) -> bool {
        self.advanced && self.violations.is_empty()
    }
}

/// Drives one counter row through verify → write → verify.
pub struct ConsistencyProbe<C: Connector> {
    connector: C,
    config: ProbeConfig,
    expected: i64,
    conn: Option<C::Conn>,
    state: ProbeState,
    stats: ProbeStats,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C: Connector> ConsistencyProbe<C> {
    pub fn new(connector: C, config: ProbeConfig) -> Self {
        Self {
            connector,
            config,
            expected: 0,
            conn: None,
            state: ProbeState::Disconnected,
            stats: ProbeStats::default(),
            shutdown: None,
        }
    }

    /// Stop sleeping and stop cycling once the channel carries `true`.
    ///
    /// Shutdown is only observed between steps and during sleeps; a
    /// statement in flight always runs to completion.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn expected(&self) -> i64 {
        self.expected
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Connect and initialize the schema, retrying within the startup budget.
    ///
    /// Exhausting the budget is fatal for the caller.
    pub async fn start(&mut self) -> ProbeResult<()> {
        let policy = self.config.startup.clone();
        let max_attempts = policy.max_attempts.max(1);

        if !self.pause(policy.initial_delay).await {
            return Err(ProbeError::Interrupted);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.initialize().await {
                Ok(()) => {
                    self.state = ProbeState::Running;
                    info!(
                        instance_id = %self.config.instance_id,
                        target = %self.connector.target(),
                        attempt,
                        "probe initialized"
                    );
                    return Ok(());
                }
                Err(source) if attempt >= max_attempts => {
                    error!(
                        instance_id = %self.config.instance_id,
                        attempts = attempt,
                        error = %source,
                        "startup failed, giving up"
                    );
                    return Err(ProbeError::Startup {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        instance_id = %self.config.instance_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "startup attempt failed"
                    );
                    if !self.pause(policy.retry_delay).await {
                        return Err(ProbeError::Interrupted);
                    }
                }
            }
        }
    }

    async fn initialize(&mut self) -> StoreResult<()> {
        self.close_connection().await;
        let mut conn = self.connector.connect().await?;
        match conn.ensure_schema(&self.config.instance_id).await {
            Ok(()) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    /// Run one verify → write → verify cycle, without the trailing sleep.
    ///
    /// Violations are reported in the returned [`CycleReport`]. A store
    /// error ends the cycle, moves the probe to `Reconnecting`, and leaves
    /// the expected value where it was.
    pub async fn run_cycle(&mut self) -> StoreResult<CycleReport> {
        let expected = self.expected;
        let mut report = CycleReport::new(expected);

        let result = match self.conn.as_mut() {
            Some(conn) => cycle_steps(conn, &self.config.instance_id, expected, &mut report).await,
            None => Err(StoreError::Connection("no open connection".to_string())),
        };
        self.stats.violations += report.violations.len() as u64;

        match result {
            Ok(()) => {
                if report.advanced {
                    self.expected = expected + 1;
                    self.stats.cycles += 1;
                    debug!(
                        instance_id = %self.config.instance_id,
                        expected = self.expected,
                        violations = report.violations.len(),
                        "cycle complete"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                self.stats.store_errors += 1;
                error!(
                    instance_id = %self.config.instance_id,
                    expected,
                    error = %e,
                    "store error, reconnecting"
                );
                self.state = ProbeState::Reconnecting;
                Err(e)
            }
        }
    }

    /// Run one bounded reconnect burst.
    ///
    /// Closes the current handle, waits the settle delay, then tries to
    /// connect up to `max_attempts` times. Success resumes cycling with
    /// the expected value unchanged; exhaustion leaves the probe
    /// `Disconnected` for the next burst.
    pub async fn reconnect(&mut self) -> BurstReport {
        let policy = self.config.reconnect.clone();
        self.state = ProbeState::Reconnecting;
        self.close_connection().await;

        self.stats.bursts += 1;
        let mut tracker = BurstTracker::new(self.stats.bursts, &policy);
        info!(
            instance_id = %self.config.instance_id,
            burst = self.stats.bursts,
            max_attempts = tracker.max_attempts(),
            "reconnecting"
        );

        if !self.pause(policy.settle_delay).await {
            return tracker.report(true);
        }

        while let Some(attempt) = tracker.next_attempt() {
            if !self.pause(policy.attempt_delay).await {
                return tracker.report(true);
            }
            match self.connector.connect().await {
                Ok(conn) => {
                    tracker.record_success();
                    self.conn = Some(conn);
                    self.state = ProbeState::Running;
                    self.stats.reconnects += 1;
                    info!(
                        instance_id = %self.config.instance_id,
                        burst = self.stats.bursts,
                        attempt,
                        expected = self.expected,
                        "reconnected"
                    );
                }
                Err(e) => {
                    tracker.record_failure(&e);
                    self.stats.failed_attempts += 1;
                }
            }
        }

        if tracker.is_exhausted() {
            self.state = ProbeState::Disconnected;
            error!(
                instance_id = %self.config.instance_id,
                burst = self.stats.bursts,
                attempts = tracker.max_attempts(),
                "reconnect burst exhausted"
            );
        }

        let interrupted = !self.pause(policy.resume_delay).await;
        tracker.report(interrupted)
    }

    /// Drive the state machine until shutdown, or until `max_cycles`
    /// cycles have completed.
    ///
    /// Reconnect bursts repeat without limit; only shutdown ends the loop
    /// while the backend is down.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> ProbeStats {
        info!(
            instance_id = %self.config.instance_id,
            interval = ?self.config.interval,
            "probe loop started"
        );

        loop {
            if self.shutdown_requested() {
                info!("shutdown requested, stopping probe loop");
                break;
            }
            if max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                debug!(cycles = self.stats.cycles, "cycle limit reached");
                break;
            }

            match self.state {
                ProbeState::Running => {
                    if self.run_cycle().await.is_ok() && !self.pause(self.config.interval).await {
                        break;
                    }
                }
                ProbeState::Reconnecting | ProbeState::Disconnected => {
                    if self.reconnect().await.interrupted {
                        break;
                    }
                }
            }
        }

        self.close_connection().await;
        info!(
            instance_id = %self.config.instance_id,
            expected = self.expected,
            cycles = self.stats.cycles,
            violations = self.stats.violations,
            bursts = self.stats.bursts,
            "probe stopped"
        );
        self.stats.clone()
    }

    /// Release the current handle, if any.
    pub async fn close_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
            debug!(instance_id = %self.config.instance_id, "connection closed");
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested
    /// before or during the sleep.
    async fn pause(&mut self, duration: Duration) -> bool {
        if self.shutdown_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let Some(rx) = self.shutdown.as_mut() else {
            tokio::time::sleep(duration).await;
            return true;
        };

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask for shutdown any more.
                        (&mut sleep).await;
                        return true;
                    }
                    if *rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Steps 1–3 of a cycle against an open connection.
async fn cycle_steps<S: CounterStore>(
    conn: &mut S,
    id: &str,
    expected: i64,
    report: &mut CycleReport,
) -> StoreResult<()> {
    let next = expected + 1;

    if let Some(violation) = verify(conn, id, Checkpoint::BeforeWrite, expected).await? {
        let missing = violation.observed.is_none();
        report.violations.push(violation);
        if missing {
            return Ok(());
        }
    }

    match conn.write_counter(id, next).await {
        Ok(()) => report.written = Some(next),
        Err(StoreError::NotFound { .. }) => {
            let violation = ConsistencyViolation {
                checkpoint: Checkpoint::AfterWrite,
                expected: next,
                observed: None,
            };
            error!(instance_id = %id, "consistency violation: {violation}");
            report.violations.push(violation);
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    if let Some(violation) = verify(conn, id, Checkpoint::AfterWrite, next).await? {
        report.violations.push(violation);
    }
    report.advanced = true;
    Ok(())
}

/// Read the counter and compare it with `expected`.
async fn verify<S: CounterStore>(
    conn: &mut S,
    id: &str,
    checkpoint: Checkpoint,
    expected: i64,
) -> StoreResult<Option<ConsistencyViolation>> {
    let observed = match conn.read_counter(id).await {
        Ok(number) => Some(number),
        Err(StoreError::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };

    if observed == Some(expected) {
        info!(instance_id = %id, %checkpoint, number = expected, "counter verified");
        return Ok(None);
    }

    let violation = ConsistencyViolation {
        checkpoint,
        expected,
        observed,
    };
    error!(
        instance_id = %id,
        %checkpoint,
        expected,
        observed = ?observed,
        "consistency violation: {violation}"
    );
    Ok(Some(violation))
}
