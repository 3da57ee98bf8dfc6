//! Linear-programming formulation of batch assignment.
//!
//! Variables `x[i][j]` in `[0, 1]` say how much of packet `i` goes on path
//! `j`. The objective counts satisfied pairs, a pair being satisfied when the
//! packet's deadline is at least the path's one-way delay. Each packet is
//! sent at most once and each path carries at most its remaining window in
//! packets. The cost-constrained variant adds `sum(cost_j * x[i][j]) <= budget`.
//!
//! Policies are vectors with one entry per packet: `0` drops the packet this
//! round, `j + 1` sends it on path `j`.

use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Variable};
use rand::Rng;

use crate::error::Result;

/// Values closer than this to 0 or 1 are treated as exactly 0 or 1.
const EPSILON: f64 = 1e-9;

/// Per-path costs and the total the batch may spend.
#[derive(Debug, Clone, Copy)]
pub struct CostBudget<'a> {
    pub costs: &'a [f64],
    pub budget: f64,
}

/// Fractional solution, indexed `[packet][path]`.
pub type Relaxation = Vec<Vec<f64>>;

/// Whether a packet with `deadline` can make it over a path with `delay` (ms).
pub fn satisfies(deadline: f64, delay: f64) -> bool {
    deadline >= delay
}

/// Solve the relaxed assignment problem.
///
/// Unsatisfiable pairs carry no objective weight; they get no variable and
/// are always 0 in the result.
pub fn solve_relaxation(
    deadlines: &[f64],
    delays: &[f64],
    capacities: &[u64],
    cost: Option<CostBudget<'_>>,
) -> Result<Relaxation> {
    let packets = deadlines.len();
    let paths = delays.len();
    let mut result = vec![vec![0.0; paths]; packets];

    let mut problem = Problem::new(OptimizationDirection::Maximize);
    let mut vars: Vec<Vec<Option<Variable>>> = vec![vec![None; paths]; packets];
    let mut any = false;

    for (i, &deadline) in deadlines.iter().enumerate() {
        for (j, &delay) in delays.iter().enumerate() {
            if satisfies(deadline, delay) {
                vars[i][j] = Some(problem.add_var(1.0, (0.0, 1.0)));
                any = true;
            }
        }
    }

    if !any {
        return Ok(result);
    }

    // Each packet at most once.
    for row in &vars {
        if let Some(expr) = sum_of(row.iter().flatten().map(|&v| (v, 1.0))) {
            problem.add_constraint(expr, ComparisonOp::Le, 1.0);
        }
    }

    // Each path within its window.
    for (j, &capacity) in capacities.iter().enumerate().take(paths) {
        if let Some(expr) = sum_of(vars.iter().filter_map(|row| row[j]).map(|v| (v, 1.0))) {
            problem.add_constraint(expr, ComparisonOp::Le, capacity as f64);
        }
    }

    if let Some(CostBudget { costs, budget }) = cost {
        let terms = vars.iter().flat_map(|row| {
            row.iter()
                .enumerate()
                .filter_map(|(j, v)| v.map(|v| (v, costs.get(j).copied().unwrap_or(0.0))))
        });
        if let Some(expr) = sum_of(terms) {
            problem.add_constraint(expr, ComparisonOp::Le, budget);
        }
    }

    let solution = problem.solve()?;
    tracing::trace!(objective = solution.objective(), packets, paths, "Batch LP solved");

    for (i, row) in vars.iter().enumerate() {
        for (j, var) in row.iter().enumerate() {
            if let Some(var) = var {
                result[i][j] = solution[*var];
            }
        }
    }
    Ok(result)
}

fn sum_of(terms: impl Iterator<Item = (Variable, f64)>) -> Option<LinearExpr> {
    let mut expr = LinearExpr::empty();
    let mut empty = true;
    for (var, coeff) in terms {
        expr.add(var, coeff);
        empty = false;
    }
    (!empty).then_some(expr)
}

/// Solve without cost and round directly.
pub fn lin_opt(deadlines: &[f64], delays: &[f64], capacities: &[u64]) -> Result<Vec<usize>> {
    let relaxation = solve_relaxation(deadlines, delays, capacities, None)?;
    Ok(direct_rounding(&relaxation))
}

/// Solve under a cost budget and round greedily.
pub fn lin_opt_with_cost<R: Rng + ?Sized>(
    deadlines: &[f64],
    delays: &[f64],
    capacities: &[u64],
    cost: CostBudget<'_>,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let relaxation = solve_relaxation(deadlines, delays, capacities, Some(cost))?;
    Ok(greedy_rounding(&relaxation, rng))
}

/// Send each packet on the first path with a nonzero share; drop all-zero rows.
///
/// For one or two paths this is the usual reading of an integral solution
/// (a fractional split defaults to the first path). With more paths the
/// lowest-indexed nonzero path wins.
pub fn direct_rounding(relaxation: &[Vec<f64>]) -> Vec<usize> {
    relaxation
        .iter()
        .map(|row| row.iter().position(|&v| v > EPSILON).map_or(0, |j| j + 1))
        .collect()
}

/// Walk each packet's shares from largest to smallest. A full share is taken;
/// the first fractional share is a coin flip between that path and dropping.
pub fn greedy_rounding<R: Rng + ?Sized>(relaxation: &[Vec<f64>], rng: &mut R) -> Vec<usize> {
    relaxation
        .iter()
        .map(|row| {
            let mut order: Vec<usize> = (0..row.len()).collect();
            order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));

            for j in order {
                let share = row[j];
                if share >= 1.0 - EPSILON {
                    return j + 1;
                }
                if share > EPSILON {
                    return if rng.gen_bool(share.min(1.0)) { j + 1 } else { 0 };
                }
            }
            0
        })
        .collect()
}
