//! Per-packet path selection.
//!
//! Implements multiple selection strategies:
//! - Round-robin by quota (fewest packets sent first)
//! - Lowest smoothed RTT, with quota balancing across unmeasured paths
//! - Random, tolerating a configurable congestion-window overcommit
//! - First available (always path 1)
//! - Learned policy, delegated to an external agent
//!
//! The initial path (ID 0) is only used while it is the sole path; once
//! more paths exist it is skipped for fresh data.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::agent::{self, ExperienceRecorder, PolicyAgent, StateVector, PENALTY_REWARD};
use super::{BatchConfig, Path, PathMap};
use crate::ackhandler::ReceivedAckState;
use crate::error::{Error, Result};
use crate::types::{ConnectionId, PathId, Version, ACK_SEND_DELAY};

/// Path selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SchedulingStrategy {
    /// Path with the smallest quota.
    #[serde(rename = "roundRobin")]
    RoundRobin,
    /// Path with the lowest smoothed RTT.
    #[default]
    #[serde(rename = "rtt")]
    LowestRtt,
    /// Uniformly random among paths with congestion budget.
    #[serde(rename = "random")]
    Random,
    /// Always path 1.
    #[serde(rename = "primary")]
    FirstAvailable,
    /// Ask the learned-policy agent.
    #[serde(rename = "dqnAgent")]
    LearnedPolicy,
}

impl SchedulingStrategy {
    /// Configuration name of the strategy.
    pub fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "roundRobin",
            Self::LowestRtt => "rtt",
            Self::Random => "random",
            Self::FirstAvailable => "primary",
            Self::LearnedPolicy => "dqnAgent",
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "roundRobin" => Ok(Self::RoundRobin),
            "rtt" => Ok(Self::LowestRtt),
            "random" => Ok(Self::Random),
            "primary" => Ok(Self::FirstAvailable),
            "dqnAgent" => Ok(Self::LearnedPolicy),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Selection strategy.
    #[serde(default)]
    pub strategy: SchedulingStrategy,

    /// Train the learned policy (report rewards, close episodes).
    #[serde(default)]
    pub training: bool,

    /// Record (state, action) pairs of the learned policy in inference mode.
    #[serde(default)]
    pub dump_experiences: bool,

    /// Directory experience files are written to.
    #[serde(default = "default_dump_path")]
    pub dump_path: PathBuf,

    /// Overcommit of the congestion window tolerated by the random strategy (%).
    #[serde(default)]
    pub allowed_congestion_percent: u32,

    /// Delay before a pending ACK is sent without a hard trigger.
    #[serde(default = "default_ack_send_delay", with = "humantime_serde")]
    pub ack_send_delay: Duration,
}

fn default_ack_send_delay() -> Duration {
    ACK_SEND_DELAY
}

fn default_dump_path() -> PathBuf {
    PathBuf::from("/tmp/")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::default(),
            training: false,
            dump_experiences: false,
            dump_path: default_dump_path(),
            allowed_congestion_percent: 0,
            ack_send_delay: default_ack_send_delay(),
        }
    }
}

impl SchedulerConfig {
    /// Receive-side ACK state for a new path of a `version` connection.
    pub fn ack_state(&self, version: Version) -> ReceivedAckState {
        ReceivedAckState::with_ack_delay(version, self.ack_send_delay)
    }
}

/// Mutable scheduling state of one connection.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Packets sent per path since setup.
    quotas: HashMap<PathId, u64>,
    /// Retransmissions drained per path.
    retransmissions: HashMap<PathId, u64>,
    /// Absolute deadlines of packets deferred by a batch round.
    pub(super) waiting: Vec<Instant>,
    /// Last state handed to the agent, and the path it picked.
    cached_decision: Option<(StateVector, PathId)>,
}

impl SchedulerState {
    pub fn quota(&self, id: PathId) -> u64 {
        self.quotas.get(&id).copied().unwrap_or(0)
    }

    /// Quota of `id`, registering the path at zero on first sight.
    fn quota_entry(&mut self, id: PathId) -> u64 {
        *self.quotas.entry(id).or_insert(0)
    }

    pub fn increment_quota(&mut self, id: PathId) {
        *self.quotas.entry(id).or_insert(0) += 1;
    }

    pub fn set_quota(&mut self, id: PathId, quota: u64) {
        self.quotas.insert(id, quota);
    }

    pub fn retransmissions(&self, id: PathId) -> u64 {
        self.retransmissions.get(&id).copied().unwrap_or(0)
    }

    pub(super) fn record_retransmission(&mut self, id: PathId) {
        *self.retransmissions.entry(id).or_insert(0) += 1;
    }

    pub fn cached_decision(&self) -> Option<(StateVector, PathId)> {
        self.cached_decision
    }

    /// Packets waiting for a later batch round.
    pub fn waiting_packets(&self) -> usize {
        self.waiting.len()
    }
}

/// Packet scheduler of one connection.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) batch: BatchConfig,
    pub(super) state: SchedulerState,
    pub(super) connection_id: ConnectionId,
    pub(super) created_at: Instant,
    pub(super) agent: Option<Box<dyn PolicyAgent>>,
    pub(super) recorder: Option<ExperienceRecorder>,
    pub(super) rng: StdRng,
}

impl Scheduler {
    /// Create a new scheduler for a connection.
    pub fn new(config: SchedulerConfig, connection_id: ConnectionId) -> Self {
        let recorder = (config.dump_experiences && !config.training)
            .then(|| ExperienceRecorder::new(config.dump_path.clone()));
        Self {
            config,
            batch: BatchConfig::default(),
            state: SchedulerState::default(),
            connection_id,
            created_at: Instant::now(),
            agent: None,
            recorder,
            rng: StdRng::from_entropy(),
        }
    }

    /// Attach the learned-policy agent.
    pub fn with_agent(mut self, agent: Box<dyn PolicyAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Seed the random source (random strategy, greedy rounding).
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Override the connection start time used for rewards.
    pub fn with_start_time(mut self, created_at: Instant) -> Self {
        self.created_at = created_at;
        self
    }

    /// Get configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SchedulerState {
        &mut self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub(super) fn learning(&self) -> bool {
        self.config.strategy == SchedulingStrategy::LearnedPolicy
    }

    /// Select the path for the next packet.
    ///
    /// `paths` must be borrowed from the path set's read guard. `from_path`
    /// is the path a pending retransmission was drained from.
    pub fn select_path(
        &mut self,
        paths: &PathMap,
        has_retransmission: bool,
        has_stream_retransmission: bool,
        from_path: Option<&Arc<Path>>,
    ) -> Result<Option<Arc<Path>>> {
        if paths.len() <= 1 {
            return Ok(Self::select_single_path(paths, has_retransmission));
        }

        let selected = match self.config.strategy {
            SchedulingStrategy::RoundRobin => self.select_round_robin(paths, has_retransmission),
            SchedulingStrategy::LowestRtt => self.select_lowest_rtt(
                paths,
                has_retransmission,
                has_stream_retransmission,
                from_path,
            ),
            SchedulingStrategy::Random => self.select_random(paths, has_retransmission),
            SchedulingStrategy::FirstAvailable => Self::select_first_available(paths),
            SchedulingStrategy::LearnedPolicy => self.select_learned(
                paths,
                has_retransmission,
                has_stream_retransmission,
                from_path,
            )?,
        };

        tracing::trace!(
            strategy = %self.config.strategy,
            path = ?selected.as_ref().map(|p| p.id()),
            "Path selected"
        );
        Ok(selected)
    }

    /// Only the initial path exists.
    pub(super) fn select_single_path(paths: &PathMap, has_retransmission: bool) -> Option<Arc<Path>> {
        let initial = paths.get(&PathId::INITIAL)?;
        if !has_retransmission && !initial.sending_allowed() {
            return None;
        }
        Some(Arc::clone(initial))
    }

    fn select_round_robin(&mut self, paths: &PathMap, has_retransmission: bool) -> Option<Arc<Path>> {
        let mut selected = None;
        let mut lower_quota = u64::MAX;

        for (&id, path) in paths {
            if id.is_initial() || path.potentially_failed() {
                continue;
            }
            // A pending retransmission may go out on a blocked path.
            if !has_retransmission && !path.sending_allowed() {
                continue;
            }

            let quota = self.state.quota_entry(id);
            if quota < lower_quota {
                selected = Some(path);
                lower_quota = quota;
            }
        }

        selected.cloned()
    }

    pub(super) fn select_lowest_rtt(
        &mut self,
        paths: &PathMap,
        has_retransmission: bool,
        has_stream_retransmission: bool,
        from_path: Option<&Arc<Path>>,
    ) -> Option<Arc<Path>> {
        // Retransmitting from an unmeasured path: spread onto a less used one.
        if has_retransmission && has_stream_retransmission {
            if let Some(from) = from_path.filter(|p| p.smoothed_rtt().is_zero()) {
                let current_quota = self.state.quota(from.id());
                let lower = paths.iter().find(|(&id, _)| {
                    !id.is_initial() && id != from.id() && self.state.quota(id) < current_quota
                });
                if let Some((id, path)) = lower {
                    tracing::trace!(path = %id, "Retransmitting on lower quota path");
                    return Some(Arc::clone(path));
                }
            }
        }

        let mut selected: Option<&Arc<Path>> = None;
        let mut lower_rtt = Duration::ZERO;

        for (&id, path) in paths {
            if !has_retransmission && !path.sending_allowed() {
                continue;
            }
            if path.potentially_failed() || id.is_initial() {
                continue;
            }

            let rtt = path.smoothed_rtt();

            // Measured paths win over unmeasured ones.
            if !lower_rtt.is_zero() && rtt.is_zero() {
                continue;
            }

            // Several unmeasured paths: balance by quota.
            if rtt.is_zero() {
                let quota = self.state.quota_entry(id);
                if let Some(current) = selected {
                    if quota > self.state.quota(current.id()) {
                        continue;
                    }
                }
            }

            if !rtt.is_zero() && !lower_rtt.is_zero() && selected.is_some() && rtt >= lower_rtt {
                continue;
            }

            lower_rtt = rtt;
            selected = Some(path);
        }

        selected.cloned()
    }

    fn select_random(&mut self, paths: &PathMap, has_retransmission: bool) -> Option<Arc<Path>> {
        let margin = f64::from(self.config.allowed_congestion_percent) * 0.01;

        let available: Vec<&Arc<Path>> = paths
            .values()
            .filter(|path| !path.is_initial())
            .filter(|path| {
                let telemetry = path.telemetry();
                let spare = telemetry.spare_window() as f64;
                let overcommit_ok =
                    spare <= 0.0 && spare >= -(telemetry.congestion_window as f64) * margin;
                telemetry.sending_allowed || overcommit_ok || has_retransmission
            })
            .collect();

        if available.is_empty() {
            return None;
        }

        let idx = self.rng.gen_range(0..available.len());
        Some(Arc::clone(available[idx]))
    }

    fn select_first_available(paths: &PathMap) -> Option<Arc<Path>> {
        paths
            .get(&PathId(1))
            .filter(|path| path.sending_allowed())
            .cloned()
    }

    fn select_learned(
        &mut self,
        paths: &PathMap,
        has_retransmission: bool,
        has_stream_retransmission: bool,
        from_path: Option<&Arc<Path>>,
    ) -> Result<Option<Arc<Path>>> {
        // A single additional path needs no decision.
        if paths.len() == 2 {
            return Ok(paths.values().find(|p| !p.is_initial()).cloned());
        }

        let available: Vec<&Arc<Path>> = paths
            .values()
            .filter(|p| !p.is_initial() && p.sending_allowed())
            .collect();

        match available.as_slice() {
            [] => return Ok(Self::select_single_path(paths, has_retransmission)),
            [only] => return Ok(Some(Arc::clone(only))),
            _ => {}
        }

        let Some(observation) = agent::observe(paths, self.created_at.elapsed()) else {
            return Ok(available.first().map(|p| Arc::clone(p)));
        };

        let connection = self.connection_id;
        let training = self.config.training;

        let Some(agent) = self.agent.as_mut() else {
            tracing::warn!("Learned policy selected without an agent, using lowest RTT");
            return Ok(self.select_lowest_rtt(
                paths,
                has_retransmission,
                has_stream_retransmission,
                from_path,
            ));
        };

        if training {
            if let Some(reason) = agent::zero_tolerance_violation(paths, &observation.candidates) {
                tracing::error!(connection = %connection, %reason, "Closing episode: zero tolerance");
                agent.end_episode(connection, PENALTY_REWARD, false);
                return Err(Error::ZeroToleranceAbort(reason));
            }
        }

        let action = agent.select_action(&observation.state);
        if training {
            agent.record_outcome(connection, observation.partial_reward, &observation.state, action);
        } else if let Some(recorder) = self.recorder.as_mut() {
            recorder.add_step(connection, observation.state, action);
        }

        let path = observation.candidates.get(action).unwrap_or_else(|| {
            tracing::warn!(action, "Agent returned an out-of-range action, using first candidate");
            &observation.candidates[0]
        });

        self.state.cached_decision = Some((observation.state, path.id()));
        Ok(Some(Arc::clone(path)))
    }
}

// Abbreviated: agent and RNG have no useful Debug output.
#[allow(clippy::missing_fields_in_debug)]
impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("strategy", &self.config.strategy)
            .field("batch_strategy", &self.batch.strategy)
            .field("training", &self.config.training)
            .field("connection", &self.connection_id)
            .finish()
    }
}
