// The "none" method: take the largest feasible rate without inspecting the
// energy. Useful when the direction provider is trusted (e.g. a pure Newton
// solve on a convex energy) and evaluations are expensive.
use super::*;

#[derive(Default)]
pub struct FixedStep {
    stats: LineSearchStats,
}

impl LineSearch for FixedStep {
    fn name(&self) -> &'static str {
        "none"
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
        let rate = feasible_starting_rate(x_k, direction_k, problem, 1e-10, &self.stats);
        if rate.is_nan() {
            problem.solution_changed(x_k);
        }
        rate
    }
}

#[cfg(test)]
mod fixed_step_tests {
    use super::*;

    struct Quadratic;

    impl Problem for Quadratic {
        fn value(&mut self, x: &DVector<Floating>) -> Floating {
            0.5 * x.dot(x)
        }
        fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
            grad.copy_from(x);
        }
    }

    #[test]
    fn returns_unit_rate_without_evaluating() {
        let mut problem = Quadratic;
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let mut grad = DVector::zeros(2);
        problem.gradient(&x, &mut grad);
        let direction = -&grad;
        let mut search = FixedStep::default();
        let rate = search.compute_step_len(&x, &direction, &mut problem, 1.0, &grad);
        assert_eq!(rate, 1.0);
        assert_eq!(search.stats().iterations.get(), 0);
    }
}
