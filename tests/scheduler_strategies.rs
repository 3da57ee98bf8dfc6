//! Tests for every per-packet path selection strategy.
//!
//! Covers RoundRobin, LowestRtt, Random, FirstAvailable and LearnedPolicy,
//! plus the single-path guard shared by all of them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use mpquic_scheduler::multipath::{
    Path, PathMap, PathTelemetry, PolicyAgent, Scheduler, SchedulerConfig, SchedulingStrategy,
    StateVector,
};
use mpquic_scheduler::types::{ConnectionId, PathId, DEFAULT_TCP_MSS};
use mpquic_scheduler::Error;

// Helper to create a path with a given smoothed RTT
fn create_path(id: u8, rtt_ms: u64) -> Arc<Path> {
    Arc::new(Path::with_telemetry(
        PathId(id),
        PathTelemetry {
            smoothed_rtt: Duration::from_millis(rtt_ms),
            ..Default::default()
        },
    ))
}

fn path_map(paths: &[Arc<Path>]) -> PathMap {
    paths.iter().map(|p| (p.id(), Arc::clone(p))).collect()
}

fn scheduler(strategy: SchedulingStrategy) -> Scheduler {
    let config = SchedulerConfig {
        strategy,
        ..Default::default()
    };
    Scheduler::new(config, ConnectionId(42)).with_rng_seed(1)
}

fn selected_id(selected: Option<Arc<Path>>) -> Option<PathId> {
    selected.map(|p| p.id())
}

// ============================================================================
// Single-path guard
// ============================================================================

#[test]
fn test_single_initial_path() {
    let initial = create_path(0, 10);
    let paths = path_map(&[initial.clone()]);

    for strategy in [
        SchedulingStrategy::RoundRobin,
        SchedulingStrategy::LowestRtt,
        SchedulingStrategy::Random,
        SchedulingStrategy::FirstAvailable,
        SchedulingStrategy::LearnedPolicy,
    ] {
        let mut sched = scheduler(strategy);
        let selected = sched.select_path(&paths, false, false, None).unwrap();
        assert_eq!(selected_id(selected), Some(PathId(0)), "{strategy}");
    }
}

#[test]
fn test_single_blocked_initial_path() {
    let initial = create_path(0, 10);
    initial.update_telemetry(|t| t.sending_allowed = false);
    let paths = path_map(&[initial]);

    let mut sched = scheduler(SchedulingStrategy::LowestRtt);
    assert!(sched.select_path(&paths, false, false, None).unwrap().is_none());

    // A pending retransmission still goes out
    let selected = sched.select_path(&paths, true, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(0)));
}

#[test]
fn test_initial_path_skipped_when_others_exist() {
    let paths = path_map(&[create_path(0, 1), create_path(1, 50)]);

    for strategy in [
        SchedulingStrategy::RoundRobin,
        SchedulingStrategy::LowestRtt,
        SchedulingStrategy::Random,
    ] {
        let mut sched = scheduler(strategy);
        let selected = sched.select_path(&paths, false, false, None).unwrap();
        assert_eq!(selected_id(selected), Some(PathId(1)), "{strategy}");
    }
}

// ============================================================================
// RoundRobin
// ============================================================================

#[test]
fn test_round_robin_picks_lowest_quota() {
    let paths = path_map(&[create_path(0, 0), create_path(1, 0), create_path(2, 0), create_path(3, 0)]);
    let mut sched = scheduler(SchedulingStrategy::RoundRobin);
    sched.state_mut().set_quota(PathId(1), 5);
    sched.state_mut().set_quota(PathId(2), 2);
    sched.state_mut().set_quota(PathId(3), 4);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
}

#[test]
fn test_round_robin_equalizes_quotas() {
    let paths = path_map(&[create_path(0, 0), create_path(1, 0), create_path(2, 0), create_path(3, 0)]);
    let mut sched = scheduler(SchedulingStrategy::RoundRobin);
    sched.state_mut().set_quota(PathId(1), 3);

    for _ in 0..20 {
        let path = sched.select_path(&paths, false, false, None).unwrap().unwrap();
        sched.state_mut().increment_quota(path.id());
    }

    let quotas: Vec<u64> = (1..=3).map(|id| sched.state().quota(PathId(id))).collect();
    let max = quotas.iter().max().unwrap();
    let min = quotas.iter().min().unwrap();
    assert!(max - min <= 1, "quotas {quotas:?}");
    assert_eq!(sched.state().quota(PathId(0)), 0);
}

#[test]
fn test_round_robin_skips_failed_and_blocked() {
    let failed = create_path(1, 0);
    failed.set_potentially_failed(true);
    let blocked = create_path(2, 0);
    blocked.update_telemetry(|t| t.sending_allowed = false);
    let paths = path_map(&[create_path(0, 0), failed, blocked, create_path(3, 0)]);

    let mut sched = scheduler(SchedulingStrategy::RoundRobin);
    sched.state_mut().set_quota(PathId(3), 100);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(3)));

    // Blocked paths are fine for retransmissions; failed ones never
    let selected = sched.select_path(&paths, true, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
}

// ============================================================================
// LowestRtt
// ============================================================================

#[test]
fn test_lowest_rtt_prefers_measured_minimum() {
    let paths = path_map(&[create_path(0, 1), create_path(1, 20), create_path(2, 5), create_path(3, 0)]);
    let mut sched = scheduler(SchedulingStrategy::LowestRtt);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
}

#[test]
fn test_lowest_rtt_measured_beats_unmeasured_in_any_order() {
    let paths = path_map(&[create_path(0, 0), create_path(1, 0), create_path(2, 30)]);
    let mut sched = scheduler(SchedulingStrategy::LowestRtt);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
}

#[test]
fn test_lowest_rtt_unmeasured_balances_by_quota() {
    let paths = path_map(&[create_path(0, 0), create_path(1, 0), create_path(2, 0)]);
    let mut sched = scheduler(SchedulingStrategy::LowestRtt);
    sched.state_mut().set_quota(PathId(1), 3);
    sched.state_mut().set_quota(PathId(2), 1);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));

    sched.state_mut().set_quota(PathId(2), 7);
    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));
}

#[test]
fn test_lowest_rtt_retransmission_from_unmeasured_path() {
    let origin = create_path(1, 0);
    let paths = path_map(&[create_path(0, 0), origin.clone(), create_path(2, 80), create_path(3, 10)]);
    let mut sched = scheduler(SchedulingStrategy::LowestRtt);
    sched.state_mut().set_quota(PathId(1), 5);
    sched.state_mut().set_quota(PathId(2), 1);
    sched.state_mut().set_quota(PathId(3), 9);

    // Stream retransmission from an unmeasured path goes to a lower-quota path
    let selected = sched.select_path(&paths, true, true, Some(&origin)).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));

    // Without stream frames the regular rule applies
    let selected = sched.select_path(&paths, true, false, Some(&origin)).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(3)));
}

#[test]
fn test_lowest_rtt_nothing_available() {
    let a = create_path(1, 10);
    let b = create_path(2, 20);
    for p in [&a, &b] {
        p.update_telemetry(|t| t.sending_allowed = false);
    }
    let paths = path_map(&[create_path(0, 0), a, b]);
    let mut sched = scheduler(SchedulingStrategy::LowestRtt);

    assert!(sched.select_path(&paths, false, false, None).unwrap().is_none());
}

// ============================================================================
// Random
// ============================================================================

#[test]
fn test_random_only_picks_eligible_paths() {
    let blocked = create_path(3, 10);
    blocked.update_telemetry(|t| {
        t.sending_allowed = false;
        t.congestion_window = 10 * DEFAULT_TCP_MSS;
        t.bytes_in_flight = 20 * DEFAULT_TCP_MSS;
    });
    let paths = path_map(&[create_path(0, 10), create_path(1, 10), create_path(2, 10), blocked]);
    let mut sched = scheduler(SchedulingStrategy::Random);

    let mut seen = [0usize; 4];
    for _ in 0..200 {
        let path = sched.select_path(&paths, false, false, None).unwrap().unwrap();
        seen[usize::from(path.id().0)] += 1;
    }
    assert_eq!(seen[0], 0);
    assert_eq!(seen[3], 0);
    assert!(seen[1] > 0 && seen[2] > 0);
}

#[test]
fn test_random_congestion_margin() {
    let over = create_path(1, 10);
    over.update_telemetry(|t| {
        t.sending_allowed = false;
        t.congestion_window = 100 * DEFAULT_TCP_MSS;
        t.bytes_in_flight = 105 * DEFAULT_TCP_MSS;
    });
    let blocked = create_path(2, 10);
    blocked.update_telemetry(|t| t.sending_allowed = false);
    let paths = path_map(&[create_path(0, 10), over, blocked]);

    // 5% over the window: outside a zero margin
    let mut strict = scheduler(SchedulingStrategy::Random);
    assert!(strict.select_path(&paths, false, false, None).unwrap().is_none());

    let config = SchedulerConfig {
        strategy: SchedulingStrategy::Random,
        allowed_congestion_percent: 10,
        ..Default::default()
    };
    let mut tolerant = Scheduler::new(config, ConnectionId(1)).with_rng_seed(3);
    let selected = tolerant.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));
}

// ============================================================================
// FirstAvailable
// ============================================================================

#[test]
fn test_first_available() {
    let first = create_path(1, 100);
    let paths = path_map(&[create_path(0, 1), first.clone(), create_path(2, 1)]);
    let mut sched = scheduler(SchedulingStrategy::FirstAvailable);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));

    first.update_telemetry(|t| t.sending_allowed = false);
    assert!(sched.select_path(&paths, false, false, None).unwrap().is_none());
}

// ============================================================================
// LearnedPolicy
// ============================================================================

#[derive(Debug, Default)]
struct AgentLog {
    states: Vec<StateVector>,
    outcomes: Vec<(ConnectionId, usize)>,
    episodes: Vec<(ConnectionId, f64, bool)>,
}

// Deterministic stand-in for the learned agent
struct StubAgent {
    action: usize,
    log: Arc<Mutex<AgentLog>>,
}

impl PolicyAgent for StubAgent {
    fn select_action(&mut self, state: &StateVector) -> usize {
        self.log.lock().states.push(*state);
        self.action
    }

    fn record_outcome(&mut self, connection: ConnectionId, _reward: f64, _state: &StateVector, action: usize) {
        self.log.lock().outcomes.push((connection, action));
    }

    fn end_episode(&mut self, connection: ConnectionId, reward: f64, terminal: bool) {
        self.log.lock().episodes.push((connection, reward, terminal));
    }
}

fn learned_scheduler(action: usize, training: bool) -> (Scheduler, Arc<Mutex<AgentLog>>) {
    let log = Arc::new(Mutex::new(AgentLog::default()));
    let config = SchedulerConfig {
        strategy: SchedulingStrategy::LearnedPolicy,
        training,
        ..Default::default()
    };
    let agent = StubAgent {
        action,
        log: Arc::clone(&log),
    };
    let sched = Scheduler::new(config, ConnectionId(7)).with_agent(Box::new(agent));
    (sched, log)
}

#[test]
fn test_learned_maps_action_to_candidate() {
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), create_path(2, 60), create_path(3, 5)]);

    let (mut sched, log) = learned_scheduler(1, false);
    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));

    let (mut sched, _) = learned_scheduler(0, false);
    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));

    let log = log.lock();
    assert_eq!(log.states.len(), 1);
    assert!((log.states[0][0] - 0.2).abs() < 1e-9);
    assert!((log.states[0][1] - 0.4).abs() < 1e-9);
}

#[test]
fn test_learned_caches_decision() {
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), create_path(2, 60)]);
    let (mut sched, _) = learned_scheduler(1, false);

    sched.select_path(&paths, false, false, None).unwrap();
    let (_, path) = sched.state().cached_decision().unwrap();
    assert_eq!(path, PathId(2));
}

#[test]
fn test_learned_degenerate_cases() {
    let (mut sched, log) = learned_scheduler(1, false);

    // One extra path: no decision
    let paths = path_map(&[create_path(0, 5), create_path(1, 30)]);
    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));

    // Only one non-initial path can send
    let blocked = create_path(2, 10);
    blocked.update_telemetry(|t| t.sending_allowed = false);
    let paths = path_map(&[create_path(0, 5), blocked, create_path(3, 30)]);
    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(3)));

    assert!(log.lock().states.is_empty());
}

#[test]
fn test_learned_training_reports_outcome() {
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), create_path(2, 60)]);
    let (mut sched, log) = learned_scheduler(0, true);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(1)));

    let log = log.lock();
    assert_eq!(log.outcomes, vec![(ConnectionId(7), 0)]);
    assert!(log.episodes.is_empty());
}

#[test]
fn test_learned_training_zero_tolerance() {
    let lossy = create_path(2, 60);
    lossy.record_loss();
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), lossy]);
    let (mut sched, log) = learned_scheduler(0, true);

    let result = sched.select_path(&paths, false, false, None);
    assert!(matches!(result, Err(Error::ZeroToleranceAbort(_))));

    let log = log.lock();
    assert_eq!(log.episodes, vec![(ConnectionId(7), -100.0, false)]);
    assert!(log.states.is_empty());
}

#[test]
fn test_learned_inference_ignores_losses() {
    let lossy = create_path(2, 60);
    lossy.record_loss();
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), lossy]);
    let (mut sched, log) = learned_scheduler(1, false);

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
    assert!(log.lock().episodes.is_empty());
}

#[test]
fn test_learned_without_agent_falls_back_to_rtt() {
    let paths = path_map(&[create_path(0, 5), create_path(1, 30), create_path(2, 10)]);
    let config = SchedulerConfig {
        strategy: SchedulingStrategy::LearnedPolicy,
        ..Default::default()
    };
    let mut sched = Scheduler::new(config, ConnectionId(1));

    let selected = sched.select_path(&paths, false, false, None).unwrap();
    assert_eq!(selected_id(selected), Some(PathId(2)));
}
