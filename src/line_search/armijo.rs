// Backtracking with the Armijo sufficient-decrease rule: accept once
// f(x + t d) <= f(x) + c1 * t * g.dot(d), c1 = 1e-4.
use super::*;

pub struct Armijo {
    c1: Floating,
    min_step_size: Floating,
    max_iterations: usize,
    use_grad_norm_tol: Floating,
    stats: LineSearchStats,
}

impl Armijo {
    pub fn new(config: &SolverConfig) -> Self {
        Armijo {
            c1: 1e-4,
            min_step_size: config.min_step_size,
            max_iterations: config.line_search.max_iterations,
            use_grad_norm_tol: config.line_search.use_grad_norm_tol,
            stats: LineSearchStats::default(),
        }
    }

    pub fn with_c1(mut self, c1: Floating) -> Self {
        assert!(c1 > 0.0, "c1 must be positive");
        assert!(c1 < 1.0, "c1 must be less than 1");
        self.c1 = c1;
        self
    }

    fn sufficient_decrease(
        &self,
        f_k: Floating,
        f_trial: Floating,
        rate: Floating,
        directional_derivative: Floating,
    ) -> bool {
        f_trial - f_k <= self.c1 * rate * directional_derivative
    }
}

impl LineSearch for Armijo {
    fn name(&self) -> &'static str {
        "armijo"
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
        grad_k: &DVector<Floating>,
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

        let directional_derivative = grad_k.dot(direction_k);

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
                if self.sufficient_decrease(f_k, f_trial, rate, directional_derivative) {
                    return rate;
                }
                if self.use_grad_norm_tol > 0.0 {
                    let mut grad_trial = DVector::zeros(x_k.len());
                    problem.gradient(&trial, &mut grad_trial);
                    if grad_trial.norm() < self.use_grad_norm_tol {
                        debug!(target: "armijo line search", "Accepting step on gradient norm tolerance");
                        return rate;
                    }
                }
            } else {
                debug!(target: "armijo line search", "Step size too big: trial iterate is out of domain, halving ({rate:?})");
            }

            rate *= 0.5;
            if rate < self.min_step_size {
                break;
            }
        }

        warn!(target: "armijo line search", "No sufficient-decrease step above the minimum step size");
        {
            let _update = ScopedTimer::new(&self.stats.time_constraint_set_update);
            problem.solution_changed(x_k);
        }
        Floating::NAN
    }
}
