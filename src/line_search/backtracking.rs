// Halving search on the energy alone: accept the first rate with a strict
// decrease. Slower than a sufficient-decrease rule on well-scaled problems but
// robust next to barrier-like energies that blow up past the feasible region.
use super::*;

pub struct Backtracking {
    min_step_size: Floating,
    max_iterations: usize,
    use_grad_norm_tol: Floating,
    stats: LineSearchStats,
}

impl Backtracking {
    pub fn new(config: &SolverConfig) -> Self {
        Backtracking {
            min_step_size: config.min_step_size,
            max_iterations: config.line_search.max_iterations,
            use_grad_norm_tol: config.line_search.use_grad_norm_tol,
            stats: LineSearchStats::default(),
        }
    }
}

impl LineSearch for Backtracking {
    fn name(&self) -> &'static str {
        "backtracking"
    }

    fn stats(&self) -> &LineSearchStats {
        &self.stats
    }

    fn compute_step_len(
        &mut self,
        x_k: &DVector<Floating>,
        direction_k: &DVector<Floating>,
        problem: &mut dyn Problem,
        f_k: Floating,
        _grad_k: &DVector<Floating>,
    ) -> Floating {
        {
            let _timer = ScopedTimer::new(&self.stats.time_checking_for_nan_inf);
            if !f_k.is_finite() || !all_finite(direction_k.iter().copied()) {
                return Floating::NAN;
            }
        }

        let mut rate = feasible_starting_rate(
            x_k,
            direction_k,
            problem,
            self.min_step_size,
            &self.stats,
        );
        if rate.is_nan() {
            problem.solution_changed(x_k);
            return Floating::NAN;
        }

        let _timer = ScopedTimer::new(&self.stats.time_classical_line_search);
        for _ in 0..self.max_iterations {
            let trial = x_k + rate * direction_k;
            {
                let _update = ScopedTimer::new(&self.stats.time_constraint_set_update);
                problem.solution_changed(&trial);
            }
            let f_trial = problem.value(&trial);
            self.stats.iterations.set(self.stats.iterations.get() + 1);

            if f_trial.is_finite() {
                if f_trial < f_k {
                    return rate;
                }
                if self.use_grad_norm_tol > 0.0 {
                    let mut grad_trial = DVector::zeros(x_k.len());
                    problem.gradient(&trial, &mut grad_trial);
                    if grad_trial.norm() < self.use_grad_norm_tol {
                        debug!(target: "backtracking line search", "Accepting step on gradient norm tolerance");
                        return rate;
                    }
                }
            } else {
                debug!(target: "backtracking line search", "Step size too big: trial iterate is out of domain, halving ({rate:?})");
            }

            rate *= 0.5;
            if rate < self.min_step_size {
                break;
            }
        }

        warn!(target: "backtracking line search", "No descent step above the minimum step size");
        {
            let _update = ScopedTimer::new(&self.stats.time_constraint_set_update);
            problem.solution_changed(x_k);
        }
        Floating::NAN
    }
}
