//! End-to-end probe scenarios against the in-memory backend.
//!
//! All delays are zero, so each scenario runs in microseconds while still
//! going through the same state machine as a live deployment.

use pgcheck_probe::{
    Checkpoint, ConsistencyProbe, ConsistencyViolation, ProbeConfig, ProbeState, ReconnectPolicy,
};
use pgcheck_store::{Connector, CounterStore, MemoryConnector};

fn immediate_probe(
    backend: &MemoryConnector,
    id: &str,
    max_attempts: u32,
) -> ConsistencyProbe<MemoryConnector> {
    let mut config = ProbeConfig::immediate(id);
    config.reconnect = ReconnectPolicy::immediate(max_attempts);
    ConsistencyProbe::new(backend.clone(), config)
}

#[tokio::test]
async fn fresh_identity_three_clean_cycles() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-1", 10);
    probe.start().await.unwrap();

    let mut clean = 0;
    for _ in 0..3 {
        let report = probe.run_cycle().await.unwrap();
        assert!(report.written.is_some());
        if report.is_clean() {
            clean += 1;
        }
    }

    assert_eq!(clean, 3);
    assert_eq!(backend.counter("probe-1"), Some(3));
    assert_eq!(backend.row_count(), 1);
    assert_eq!(probe.expected(), 3);
    assert_eq!(probe.stats().violations, 0);
    assert_eq!(backend.writes(), 3);
    assert_eq!(backend.reads(), 6);
}

#[tokio::test]
async fn monotonic_over_many_cycles() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-mono", 10);
    probe.start().await.unwrap();

    let stats = probe.run(Some(50)).await;

    assert_eq!(stats.cycles, 50);
    assert_eq!(stats.violations, 0);
    assert_eq!(backend.counter("probe-mono"), Some(50));
    assert_eq!(probe.expected(), 50);
}

#[tokio::test]
async fn drop_after_two_cycles_recovers_on_third_attempt() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-1", 10);
    probe.start().await.unwrap();
    probe.run_cycle().await.unwrap();
    probe.run_cycle().await.unwrap();
    assert_eq!(probe.expected(), 2);

    backend.sever_connections();
    backend.refuse_next_connects(2);

    let err = probe.run_cycle().await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(probe.state(), ProbeState::Reconnecting);

    let burst = probe.reconnect().await;
    assert!(burst.connected);
    assert_eq!(burst.failures, 2);
    assert_eq!(burst.attempts, 3);
    assert_eq!(probe.expected(), 2);

    let report = probe.run_cycle().await.unwrap();
    assert_eq!(report.expected_before, 2);
    assert!(report.is_clean(), "cycle 3 must verify 2 before writing 3");
    assert_eq!(backend.counter("probe-1"), Some(3));
    assert_eq!(probe.stats().reconnects, 1);
    assert_eq!(probe.stats().failed_attempts, 2);
}

#[tokio::test]
async fn outage_longer_than_cap_repeats_bounded_bursts() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-1", 3);
    probe.start().await.unwrap();
    probe.run_cycle().await.unwrap();

    backend.sever_connections();
    // Two full bursts of 3, then the third burst connects on its second try.
    backend.refuse_next_connects(7);
    probe.run_cycle().await.unwrap_err();

    let first = probe.reconnect().await;
    assert_eq!((first.burst, first.attempts, first.connected), (1, 3, false));
    assert_eq!(probe.state(), ProbeState::Disconnected);

    let second = probe.reconnect().await;
    assert_eq!((second.burst, second.attempts, second.connected), (2, 3, false));

    let third = probe.reconnect().await;
    assert_eq!((third.burst, third.attempts, third.connected), (3, 2, true));
    assert_eq!(probe.state(), ProbeState::Running);

    let report = probe.run_cycle().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(backend.counter("probe-1"), Some(2));
    assert_eq!(backend.connect_attempts(), 1 + 8);
}

#[tokio::test]
async fn run_loop_rides_out_an_outage() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-loop", 2);
    probe.start().await.unwrap();
    probe.run_cycle().await.unwrap();

    backend.sever_connections();
    backend.refuse_next_connects(5);

    let stats = probe.run(Some(4)).await;

    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.store_errors, 1);
    assert_eq!(stats.bursts, 3);
    assert_eq!(stats.failed_attempts, 5);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.violations, 0);
    assert_eq!(backend.counter("probe-loop"), Some(4));
}

#[tokio::test]
async fn lost_write_during_outage_is_detected_after_reconnect() {
    let backend = MemoryConnector::new();
    let mut probe = immediate_probe(&backend, "probe-1", 10);
    probe.start().await.unwrap();
    probe.run_cycle().await.unwrap();
    probe.run_cycle().await.unwrap();

    // The backend comes back having lost the last write.
    backend.sever_connections();
    backend.set_counter("probe-1", 1);
    probe.run_cycle().await.unwrap_err();
    assert!(probe.reconnect().await.connected);

    let report = probe.run_cycle().await.unwrap();
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation {
            checkpoint: Checkpoint::BeforeWrite,
            expected: 2,
            observed: Some(1),
        }]
    );
    assert_eq!(probe.expected(), 3);
    assert_eq!(backend.counter("probe-1"), Some(3));
}

#[tokio::test]
async fn restart_with_existing_row_never_resets_it() {
    let backend = MemoryConnector::new();
    {
        let mut probe = immediate_probe(&backend, "probe-1", 10);
        probe.start().await.unwrap();
        probe.run(Some(5)).await;
    }
    assert_eq!(backend.counter("probe-1"), Some(5));

    let mut conn = backend.connect().await.unwrap();
    conn.ensure_schema("probe-1").await.unwrap();
    conn.close().await;

    let mut restarted = immediate_probe(&backend, "probe-1", 10);
    restarted.start().await.unwrap();
    assert_eq!(backend.counter("probe-1"), Some(5));
    assert_eq!(backend.row_count(), 1);

    // The fresh process expects 0, so its first check reports the gap.
    let report = restarted.run_cycle().await.unwrap();
    assert_eq!(report.violations[0].observed, Some(5));
}

#[tokio::test]
async fn identities_do_not_interfere() {
    let backend = MemoryConnector::new();
    let mut a = immediate_probe(&backend, "probe-a", 10);
    let mut b = immediate_probe(&backend, "probe-b", 10);
    a.start().await.unwrap();
    b.start().await.unwrap();

    a.run(Some(3)).await;
    b.run(Some(7)).await;

    assert_eq!(backend.counter("probe-a"), Some(3));
    assert_eq!(backend.counter("probe-b"), Some(7));
    assert_eq!(backend.row_count(), 2);
}
