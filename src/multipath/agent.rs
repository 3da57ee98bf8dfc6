//! Port to the learned path-selection policy.
//!
//! The agent itself (network, weights, training algorithm) lives outside
//! this crate. The scheduler only builds the state vector, asks for an
//! action, and, while training, reports rewards and episode ends.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{Path, PathMap};
use crate::error::Result;
use crate::types::{ByteCount, ConnectionId, DEFAULT_TCP_MSS};

/// Width of the state vector handed to the agent.
pub const STATE_WIDTH: usize = 6;

/// `[rtt_a, rtt_b, cwnd_a, cwnd_b, utilization_a, utilization_b]`, normalized.
pub type StateVector = [f64; STATE_WIDTH];

/// Reward reported when an episode is cut short.
pub const PENALTY_REWARD: f64 = -100.0;

/// Packets on the initial path after which the handshake counts as too slow.
pub const MAX_INITIAL_PATH_PACKETS: u64 = 20;

const RTT_NORMALIZER: Duration = Duration::from_millis(150);
const CWND_NORMALIZER_SEGMENTS: f64 = 300.0;
const PARTIAL_REWARD_SCALE_MBPS: f64 = 35.0;
const EPISODE_TRANSFER_MEGABITS: f64 = 8.0;
const FINAL_REWARD_SCALE: f64 = 5.0;

/// Best goodput observed per RTT bucket (upper bound of bucket, Mbit/s).
const GOODPUT_REFERENCE_MBPS: [(Duration, f64); 5] = [
    (Duration::from_millis(10), 40.0),
    (Duration::from_millis(25), 30.0),
    (Duration::from_millis(50), 20.0),
    (Duration::from_millis(100), 10.0),
    (Duration::from_millis(250), 5.0),
];
const GOODPUT_REFERENCE_FLOOR_MBPS: f64 = 2.5;

/// Synchronous port to the path-selection agent.
pub trait PolicyAgent: Send {
    /// Choose an action (index into the candidate paths) for `state`.
    fn select_action(&mut self, state: &StateVector) -> usize;

    /// Training only: report the reward observed for a decision.
    fn record_outcome(
        &mut self,
        _connection: ConnectionId,
        _reward: f64,
        _state: &StateVector,
        _action: usize,
    ) {
    }

    /// Training only: close the connection's episode.
    fn end_episode(&mut self, _connection: ConnectionId, _reward: f64, _terminal: bool) {}
}

/// State, partial reward and the two candidate paths a decision is made over.
#[derive(Debug, Clone)]
pub struct Observation {
    pub state: StateVector,
    pub partial_reward: f64,
    pub candidates: [Arc<Path>; 2],
}

/// Build the agent's view from the two lowest-numbered non-initial paths.
///
/// Returns `None` when fewer than two such paths exist.
pub fn observe(paths: &PathMap, elapsed: Duration) -> Option<Observation> {
    let mut non_initial = paths.values().filter(|p| !p.is_initial());
    let first = Arc::clone(non_initial.next()?);
    let second = Arc::clone(non_initial.next()?);

    let a = first.telemetry();
    let b = second.telemetry();
    let state = [
        normalize_rtt(a.smoothed_rtt),
        normalize_rtt(b.smoothed_rtt),
        normalize_cwnd(a.congestion_window),
        normalize_cwnd(b.congestion_window),
        a.utilization(),
        b.utilization(),
    ];

    let sent = first.statistics().bytes_sent + second.statistics().bytes_sent;
    Some(Observation {
        state,
        partial_reward: partial_reward(sent, elapsed),
        candidates: [first, second],
    })
}

/// Why a training episode must stop, if it must.
pub fn zero_tolerance_violation(paths: &PathMap, candidates: &[Arc<Path>; 2]) -> Option<String> {
    let initial_packets = paths
        .values()
        .find(|p| p.is_initial())
        .map_or(0, |p| p.statistics().packets_sent);
    if initial_packets > MAX_INITIAL_PATH_PACKETS {
        return Some(format!("handshake needed {initial_packets} packets"));
    }

    let (retransmissions, losses) = candidates.iter().fold((0, 0), |(r, l), p| {
        let stats = p.statistics();
        (r + stats.retransmissions, l + stats.losses)
    });
    if retransmissions > 0 || losses > 0 {
        return Some(format!(
            "{retransmissions} retransmissions and {losses} losses on tracked paths"
        ));
    }
    None
}

pub fn normalize_rtt(rtt: Duration) -> f64 {
    rtt.as_secs_f64() / RTT_NORMALIZER.as_secs_f64()
}

pub fn normalize_cwnd(cwnd: ByteCount) -> f64 {
    cwnd as f64 / DEFAULT_TCP_MSS as f64 / CWND_NORMALIZER_SEGMENTS
}

/// Goodput achieved so far on the tracked paths, normalized.
pub fn partial_reward(sent_bytes: ByteCount, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let megabits = sent_bytes as f64 * 8.0 / 1024.0 / 1024.0;
    megabits / secs / PARTIAL_REWARD_SCALE_MBPS
}

/// Reference goodput for the RTT bucket `rtt` falls in.
pub fn reference_goodput(rtt: Duration) -> f64 {
    GOODPUT_REFERENCE_MBPS
        .iter()
        .find(|(bound, _)| rtt <= *bound)
        .map_or(GOODPUT_REFERENCE_FLOOR_MBPS, |(_, mbps)| *mbps)
}

/// Episode-closing reward: transfer goodput relative to the best goodput
/// seen for the connection's worst RTT.
pub fn final_goodput_reward(elapsed: Duration, max_rtt: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return FINAL_REWARD_SCALE;
    }
    let goodput = EPISODE_TRANSFER_MEGABITS / secs;
    FINAL_REWARD_SCALE * goodput / reference_goodput(max_rtt)
}

#[derive(Debug, Clone, Serialize)]
struct ExperienceStep {
    state: StateVector,
    action: usize,
}

/// Buffers (state, action) pairs per connection and writes them as JSON lines.
#[derive(Debug)]
pub struct ExperienceRecorder {
    dir: PathBuf,
    episodes: HashMap<ConnectionId, Vec<ExperienceStep>>,
}

impl ExperienceRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            episodes: HashMap::new(),
        }
    }

    pub fn add_step(&mut self, connection: ConnectionId, state: StateVector, action: usize) {
        self.episodes
            .entry(connection)
            .or_default()
            .push(ExperienceStep { state, action });
    }

    pub fn pending_steps(&self, connection: ConnectionId) -> usize {
        self.episodes.get(&connection).map_or(0, Vec::len)
    }

    /// Flush the connection's steps to disk. Returns the file written, if any.
    pub fn close(&mut self, connection: ConnectionId) -> Result<Option<PathBuf>> {
        let Some(steps) = self.episodes.remove(&connection) else {
            return Ok(None);
        };

        let path = self.dir.join(format!("experience_{connection}.jsonl"));
        let mut out = BufWriter::new(File::create(&path)?);
        for step in &steps {
            serde_json::to_writer(&mut out, step)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        tracing::info!(connection = %connection, steps = steps.len(), file = %path.display(), "Experience written");
        Ok(Some(path))
    }
}
