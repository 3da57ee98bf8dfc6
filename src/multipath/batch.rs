//! Deadline-aware batch assignment.
//!
//! Instead of choosing a path packet by packet, a whole batch of packets,
//! each with a relative deadline in milliseconds, is mapped onto the paths
//! in one decision. Strategies:
//! - `BatchLinOpt`: LP over deadline feasibility and remaining windows
//! - `BatchEDF`: lowest-RTT selection in ascending deadline order
//! - `firstPath`: everything on path 1

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::linopt::{self, CostBudget};
use super::{Path, PathMap, Scheduler};
use crate::types::PathId;

/// One entry per packet; `None` means the packet is not sent this round.
pub type BatchAssignment = Vec<Option<Arc<Path>>>;

/// Batch assignment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BatchStrategy {
    #[serde(rename = "BatchLinOpt")]
    LinOpt,
    #[serde(rename = "BatchEDF")]
    EarliestDeadlineFirst,
    #[default]
    #[serde(rename = "firstPath")]
    FirstPath,
}

impl fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LinOpt => "BatchLinOpt",
            Self::EarliestDeadlineFirst => "BatchEDF",
            Self::FirstPath => "firstPath",
        })
    }
}

/// Cost of sending one packet on a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathCost {
    pub path: PathId,
    pub cost: f64,
}

/// Batch scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub strategy: BatchStrategy,

    /// Add the cost budget row to the LP and round greedily.
    #[serde(default)]
    pub cost_constraint: bool,

    /// Total cost one batch may spend.
    #[serde(default = "default_budget")]
    pub budget: f64,

    /// Per-path costs; unlisted paths are free.
    #[serde(default = "default_path_costs")]
    pub path_costs: Vec<PathCost>,

    /// Scale one-way delays by each path's exploration multiplier.
    #[serde(default)]
    pub bandit: bool,

    #[serde(default = "default_min_deadline", with = "humantime_serde")]
    pub min_generated_deadline: Duration,

    #[serde(default = "default_max_deadline", with = "humantime_serde")]
    pub max_generated_deadline: Duration,
}

fn default_budget() -> f64 {
    4.0
}

fn default_path_costs() -> Vec<PathCost> {
    vec![
        PathCost { path: PathId(1), cost: 1.5 },
        PathCost { path: PathId(3), cost: 0.5 },
    ]
}

fn default_min_deadline() -> Duration {
    Duration::from_millis(10)
}

fn default_max_deadline() -> Duration {
    Duration::from_millis(40)
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            cost_constraint: false,
            budget: default_budget(),
            path_costs: default_path_costs(),
            bandit: false,
            min_generated_deadline: default_min_deadline(),
            max_generated_deadline: default_max_deadline(),
        }
    }
}

impl BatchConfig {
    pub fn path_cost(&self, id: PathId) -> f64 {
        self.path_costs
            .iter()
            .find(|c| c.path == id)
            .map_or(0.0, |c| c.cost)
    }
}

/// Paths a batch may use: not the initial path, window not overcommitted.
fn eligible_paths(paths: &PathMap) -> Vec<&Arc<Path>> {
    paths
        .values()
        .filter(|p| !p.is_initial())
        .filter(|p| {
            let telemetry = p.telemetry();
            telemetry.congestion_window >= telemetry.bytes_in_flight
        })
        .collect()
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl Scheduler {
    /// Map a batch of relative deadlines (ms) onto paths.
    ///
    /// Returns `None` when the batch cannot be sent at all this round.
    pub fn assign_batch(
        &mut self,
        paths: &PathMap,
        deadlines: &[f64],
        has_retransmission: bool,
        has_stream_retransmission: bool,
        from_path: Option<&Arc<Path>>,
    ) -> Option<BatchAssignment> {
        tracing::debug!(strategy = %self.batch.strategy, size = deadlines.len(), "Batch scheduling");

        if paths.len() <= 1 {
            let initial = Self::select_single_path(paths, has_retransmission)?;
            return Some(vec![Some(initial); deadlines.len()]);
        }

        match self.batch.strategy {
            BatchStrategy::LinOpt => self.assign_lin_opt(paths, deadlines),
            BatchStrategy::EarliestDeadlineFirst => Some(self.assign_edf(
                paths,
                deadlines,
                has_retransmission,
                has_stream_retransmission,
                from_path,
            )),
            BatchStrategy::FirstPath => Self::assign_first_path(paths, deadlines.len()),
        }
    }

    fn assign_lin_opt(&mut self, paths: &PathMap, deadlines: &[f64]) -> Option<BatchAssignment> {
        let eligible = eligible_paths(paths);
        if eligible.is_empty() {
            return None;
        }

        let delays: Vec<f64> = eligible
            .iter()
            .map(|p| {
                let one_way = millis(p.smoothed_rtt()) / 2.0;
                if self.batch.bandit {
                    tracing::trace!(path = %p.id(), alpha = p.alpha(), "Bandit arm");
                    one_way * p.alpha()
                } else {
                    one_way
                }
            })
            .collect();
        let capacities: Vec<u64> = eligible
            .iter()
            .map(|p| p.telemetry().remaining_packets())
            .collect();

        let policy = if self.batch.cost_constraint {
            let costs: Vec<f64> = eligible.iter().map(|p| self.batch.path_cost(p.id())).collect();
            let cost = CostBudget {
                costs: &costs,
                budget: self.batch.budget,
            };
            linopt::lin_opt_with_cost(deadlines, &delays, &capacities, cost, &mut self.rng)
        } else {
            linopt::lin_opt(deadlines, &delays, &capacities)
        };

        let policy = policy.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Batch LP failed, dropping batch");
            vec![0; deadlines.len()]
        });
        tracing::debug!(?delays, ?capacities, ?policy, "Batch policy");

        let assignment: BatchAssignment = policy
            .iter()
            .map(|&choice| {
                choice
                    .checked_sub(1)
                    .and_then(|j| eligible.get(j))
                    .map(|p| Arc::clone(p))
            })
            .collect();

        if self.batch.cost_constraint {
            tracing::debug!(cost = self.batch_cost(&assignment), "Batch cost");
        }
        Some(assignment)
    }

    fn assign_edf(
        &mut self,
        paths: &PathMap,
        deadlines: &[f64],
        has_retransmission: bool,
        has_stream_retransmission: bool,
        from_path: Option<&Arc<Path>>,
    ) -> BatchAssignment {
        let mut order: Vec<usize> = (0..deadlines.len()).collect();
        order.sort_by(|&a, &b| deadlines[a].total_cmp(&deadlines[b]));

        let mut assignment = vec![None; deadlines.len()];
        for idx in order {
            assignment[idx] = self.select_lowest_rtt(
                paths,
                has_retransmission,
                has_stream_retransmission,
                from_path,
            );
        }
        assignment
    }

    fn assign_first_path(paths: &PathMap, size: usize) -> Option<BatchAssignment> {
        let first = paths
            .get(&PathId(1))
            .filter(|p| p.sending_allowed())?;
        Some(vec![Some(Arc::clone(first)); size])
    }

    /// Whether the eligible paths' remaining windows fit `batch` packets.
    pub fn can_schedule_batch(&self, paths: &PathMap, batch: usize) -> bool {
        let capacity: u64 = eligible_paths(paths)
            .iter()
            .map(|p| p.telemetry().remaining_packets())
            .sum();
        capacity >= batch as u64
    }

    /// Total configured cost of an assignment.
    pub fn batch_cost(&self, assignment: &[Option<Arc<Path>>]) -> f64 {
        assignment
            .iter()
            .flatten()
            .map(|p| self.batch.path_cost(p.id()))
            .sum()
    }

    /// Keep a packet's absolute deadline for the next batch round.
    pub fn defer_packet(&mut self, deadline: Instant) {
        self.state.waiting.push(deadline);
    }

    /// Fresh deadlines followed by the deferred ones, as remaining ms at `now`.
    ///
    /// Deferred deadlines already past come out negative. The deferred queue
    /// is emptied.
    pub fn batch_deadlines(&mut self, fresh: Vec<f64>, now: Instant) -> Vec<f64> {
        let mut deadlines = fresh;
        deadlines.extend(self.state.waiting.drain(..).map(|deadline| {
            if deadline >= now {
                millis(deadline - now)
            } else {
                -millis(now - deadline)
            }
        }));
        deadlines
    }

    /// Draw a batch of `size` deadlines, counting deferred packets against it.
    pub fn generate_batch_deadlines(&mut self, size: usize, now: Instant) -> Vec<f64> {
        let fresh_count = size.saturating_sub(self.state.waiting.len());
        let min = self.batch.min_generated_deadline.as_millis() as u64;
        let max = self.batch.max_generated_deadline.as_millis() as u64;

        let fresh = (0..fresh_count)
            .map(|_| {
                if min >= max {
                    min as f64
                } else {
                    self.rng.gen_range(min..max) as f64
                }
            })
            .collect();
        self.batch_deadlines(fresh, now)
    }
}
