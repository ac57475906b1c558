use super::*;
use std::cell::Cell;

pub mod backtracking;
pub use backtracking::*;
pub mod armijo;
pub use armijo::*;
pub mod fixed_step;
pub use fixed_step::*;

/// Cumulative per-solve line-search accounting, split by phase the way the
/// solver-info record reports it.
#[derive(Debug, Default)]
pub struct LineSearchStats {
    pub iterations: Cell<usize>,
    pub time_checking_for_nan_inf: Cell<Floating>,
    pub time_broad_phase_ccd: Cell<Floating>,
    pub time_ccd: Cell<Floating>,
    pub time_classical_line_search: Cell<Floating>,
    pub time_constraint_set_update: Cell<Floating>,
}

impl LineSearchStats {
    pub fn reset(&self) {
        self.iterations.set(0);
        self.time_checking_for_nan_inf.set(0.0);
        self.time_broad_phase_ccd.set(0.0);
        self.time_ccd.set(0.0);
        self.time_classical_line_search.set(0.0);
        self.time_constraint_set_update.set(0.0);
    }
}

/// Searches a step rate `r > 0` along `direction_k` with `f(x + r d) < f(x)`.
/// Returns NaN when no admissible rate at or above the minimum step exists;
/// in that case the problem is re-notified of the unchanged iterate.
pub trait LineSearch {
    fn name(&self) -> &'static str;

    fn stats(&self) -> &LineSearchStats;

    fn compute_step_len(
        &mut self,
        x_k: &DVector<Floating>,
        direction_k: &DVector<Floating>,
        problem: &mut dyn Problem,
        f_k: Floating,
        grad_k: &DVector<Floating>,
    ) -> Floating;
}

/// Variant factory keyed on `line_search.method`. Unknown selectors fall back
/// to backtracking.
pub fn new_line_search(config: &SolverConfig) -> Box<dyn LineSearch> {
    match config.line_search.method.as_str() {
        "backtracking" => Box::new(Backtracking::new(config)),
        "armijo" => Box::new(Armijo::new(config)),
        "none" => Box::new(FixedStep::default()),
        other => {
            warn!(target: "line search", "Unknown line search {other:?}, falling back to backtracking");
            Box::new(Backtracking::new(config))
        }
    }
}

/// Largest feasible starting rate for the step `x -> x + d`: the problem's
/// admissible fraction capped at one, then halved until the candidate step
/// passes the validity filter. Returns NaN below `min_step_size`.
pub(crate) fn feasible_starting_rate(
    x_k: &DVector<Floating>,
    direction_k: &DVector<Floating>,
    problem: &mut dyn Problem,
    min_step_size: Floating,
    stats: &LineSearchStats,
) -> Floating {
    let mut rate = {
        let _timer = ScopedTimer::new(&stats.time_broad_phase_ccd);
        problem.max_step_from(x_k, &(x_k + direction_k)).min(1.0)
    };
    if !(rate > 0.0) {
        return Floating::NAN;
    }
    let _timer = ScopedTimer::new(&stats.time_ccd);
    while !problem.is_step_valid(x_k, &(x_k + rate * direction_k)) {
        rate *= 0.5;
        if rate < min_step_size {
            warn!(target: "line search", "No valid step above the minimum step size");
            return Floating::NAN;
        }
    }
    rate
}
