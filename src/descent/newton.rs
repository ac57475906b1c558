use super::*;

/// Accepted iterations a numeric factorization is reused for before the
/// Hessian is reassembled and refactorized.
pub const HESSIAN_REFRESH_PERIOD: usize = 5;

/// Sparse damped Newton: solve `(H + eps I) dx = g`, return `-dx`. The
/// symbolic analysis is kept until the sparsity may have changed (first use,
/// remesh); the numeric factorization follows the refresh cadence.
pub struct NewtonDirection {
    solver: Box<dyn SparseLinearSolver>,
    hessian: SparseHessian,
    regularization: Floating,
    pattern_dirty: bool,
    factorized: bool,
}

impl NewtonDirection {
    pub fn new(config: &SolverConfig) -> Self {
        let mut solver = new_sparse_solver(&config.solver, &config.preconditioner);
        solver.set_parameters(&SolverParams::default());
        NewtonDirection {
            solver,
            hessian: SparseHessian::new(0),
            regularization: config.hessian_regularization,
            pattern_dirty: true,
            factorized: false,
        }
    }

    /// Drops the factorization and forces a symbolic re-analysis on next use.
    pub fn invalidate(&mut self) {
        self.pattern_dirty = true;
        self.factorized = false;
    }

    pub fn compute(
        &mut self,
        problem: &mut dyn Problem,
        x: &DVector<Floating>,
        grad: &DVector<Floating>,
        iterations: usize,
        timers: &PhaseTimers,
        internal_solver: &mut Vec<serde_json::Value>,
    ) -> Result<DVector<Floating>, DirectionError> {
        let n = x.len();
        let refresh = !self.factorized || iterations % HESSIAN_REFRESH_PERIOD == 0;

        if refresh {
            {
                let _timer = ScopedTimer::new(&timers.assembly);
                self.hessian.resize(n);
                if !problem.hessian(x, &mut self.hessian) {
                    return Err(DirectionError::HessianUnavailable);
                }
            }
            let _timer = ScopedTimer::new(&timers.inverting);
            let matrix = self.hessian.to_csc(self.regularization)?;
            if self.pattern_dirty {
                self.solver.analyze_pattern(&matrix)?;
                self.pattern_dirty = false;
            }
            self.solver.factorize(&matrix)?;
            self.factorized = true;
        }

        let _timer = ScopedTimer::new(&timers.inverting);
        let mut direction = DVector::zeros(n);
        self.solver.solve(grad, &mut direction)?;
        direction.neg_mut();
        internal_solver.push(self.solver.info());

        if !direction.norm().is_finite() {
            return Err(DirectionError::NonFinite);
        }
        Ok(direction)
    }
}

#[cfg(test)]
mod newton_tests {
    use super::*;

    // f(x) = 0.5 x^T A x - b^T x over a tridiagonal SPD A, with a call counter
    // to observe the factorization cadence.
    struct TridiagonalQuadratic {
        n: usize,
        hessian_calls: usize,
    }

    impl TridiagonalQuadratic {
        fn apply(&self, x: &DVector<Floating>) -> DVector<Floating> {
            DVector::from_fn(self.n, |i, _| {
                let mut v = 2.5 * x[i];
                if i > 0 {
                    v -= x[i - 1];
                }
                if i + 1 < self.n {
                    v -= x[i + 1];
                }
                v
            })
        }
    }

    impl Problem for TridiagonalQuadratic {
        fn value(&mut self, x: &DVector<Floating>) -> Floating {
            0.5 * self.apply(x).dot(x) - x.sum()
        }
        fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
            grad.copy_from(&self.apply(x));
            grad.add_scalar_mut(-1.0);
        }
        fn hessian(&mut self, _x: &DVector<Floating>, hessian: &mut SparseHessian) -> bool {
            self.hessian_calls += 1;
            for i in 0..self.n {
                hessian.add(i, i, 2.5);
                if i + 1 < self.n {
                    hessian.add(i, i + 1, -1.0);
                    hessian.add(i + 1, i, -1.0);
                }
            }
            true
        }
    }

    #[test]
    fn newton_direction_descends() {
        let mut problem = TridiagonalQuadratic {
            n: 6,
            hessian_calls: 0,
        };
        let mut newton = NewtonDirection::new(&SolverConfig::default());
        let timers = PhaseTimers::default();
        let mut internal = Vec::new();

        let x = DVector::zeros(6);
        let mut grad = DVector::zeros(6);
        problem.gradient(&x, &mut grad);
        let direction = newton
            .compute(&mut problem, &x, &grad, 0, &timers, &mut internal)
            .unwrap();
        assert!(direction.dot(&grad) < 0.0);
        assert_eq!(internal.len(), 1);
    }

    #[test]
    fn factorization_follows_refresh_cadence() {
        let mut problem = TridiagonalQuadratic {
            n: 6,
            hessian_calls: 0,
        };
        let mut newton = NewtonDirection::new(&SolverConfig::default());
        let timers = PhaseTimers::default();
        let mut internal = Vec::new();

        let x = DVector::zeros(6);
        let mut grad = DVector::zeros(6);
        problem.gradient(&x, &mut grad);

        let iterations = 12;
        for k in 0..iterations {
            newton
                .compute(&mut problem, &x, &grad, k, &timers, &mut internal)
                .unwrap();
        }
        // reassembled at iterations 0, 5 and 10
        assert_eq!(problem.hessian_calls, 3);
    }

    #[test]
    fn missing_hessian_reports_unavailable() {
        struct FirstOrderOnly;
        impl Problem for FirstOrderOnly {
            fn value(&mut self, x: &DVector<Floating>) -> Floating {
                x.dot(x)
            }
            fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
                grad.copy_from(&(2.0 * x));
            }
        }

        let mut problem = FirstOrderOnly;
        let mut newton = NewtonDirection::new(&SolverConfig::default());
        let timers = PhaseTimers::default();
        let mut internal = Vec::new();
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let grad = DVector::from_vec(vec![2.0, 2.0]);
        assert!(matches!(
            newton.compute(&mut problem, &x, &grad, 0, &timers, &mut internal),
            Err(DirectionError::HessianUnavailable)
        ));
    }
}
