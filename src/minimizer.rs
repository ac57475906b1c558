use super::*;
use std::time::Instant;

/// Step norms below this while the gradient is still above tolerance stop the
/// solve: the iterate is pinned and no further progress is possible.
const STEP_TOO_SMALL_TOL: Floating = 1e-10;

/// A terminal eigenvalue below the negated tolerance flags a saddle point.
const SADDLE_EIGENVALUE_TOL: Floating = 1e-8;

/// The single fatal channel out of a solve.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct MinimizeError {
    pub status: Status,
    pub error_code: ErrorCode,
    pub message: String,
}

impl MinimizeError {
    pub fn new(status: Status, error_code: ErrorCode, message: impl Into<String>) -> Self {
        MinimizeError {
            status,
            error_code,
            message: message.into(),
        }
    }
}

/// The nonlinear minimization engine. One instance is reusable across solves;
/// `minimize` re-initializes all per-solve state first, keeping only the
/// configured line search.
#[derive(derive_getters::Getters)]
pub struct Minimizer {
    config: SolverConfig,
    stop: Criteria,
    current: Criteria,
    status: Status,
    error_code: ErrorCode,
    first_grad_norm: Floating,
    #[getter(skip)]
    ladder: StrategyLadder,
    #[getter(skip)]
    line_search: Box<dyn LineSearch>,
    timers: PhaseTimers,
    #[getter(skip)]
    internal_solver: Vec<serde_json::Value>,
    solver_info: serde_json::Map<String, serde_json::Value>,
}

impl Minimizer {
    pub fn new(config: SolverConfig) -> Self {
        let stop = Criteria {
            iterations: config.max_iterations,
            x_delta: config.x_delta,
            f_delta: config.f_delta,
            grad_norm: config.grad_norm,
            condition: 0.0,
        };
        let ladder = StrategyLadder::new(&config);
        let line_search = new_line_search(&config);
        Minimizer {
            stop,
            current: Criteria::new_current(),
            status: Status::Continue,
            error_code: ErrorCode::Success,
            first_grad_norm: 0.0,
            ladder,
            line_search,
            timers: PhaseTimers::default(),
            internal_solver: Vec::new(),
            solver_info: serde_json::Map::new(),
            config,
        }
    }

    pub fn descent_strategy(&self) -> DescentStrategy {
        self.ladder.current()
    }

    fn reset(&mut self) {
        self.current.reset();
        self.status = Status::Continue;
        self.error_code = ErrorCode::Success;
        self.first_grad_norm = 0.0;
        self.ladder.reset();
        self.line_search.stats().reset();
        self.timers.reset();
        self.internal_solver.clear();
        self.solver_info = serde_json::Map::new();
    }

    /// Minimizes the problem starting from (and mutating) `x`.
    ///
    /// Converged stops return `Ok`; so does a clean stop through the problem's
    /// `callback`. Reaching the iteration cap, non-finite evaluations, an
    /// exhausted line search at the last fallback strategy, a pinned iterate
    /// and a terminal saddle point are all surfaced as `MinimizeError`.
    pub fn minimize<P: Problem>(
        &mut self,
        problem: &mut P,
        x: &mut DVector<Floating>,
    ) -> Result<(), MinimizeError> {
        let problem: &mut dyn Problem = problem;
        self.reset();
        let solve_start = Instant::now();

        let outcome = self.run(problem, x);

        self.timers.total.set(solve_start.elapsed().as_secs_f64());
        self.finalize();

        outcome?;
        match self.status {
            Status::IterationLimit => Err(MinimizeError::new(
                Status::IterationLimit,
                self.error_code,
                "Reached iteration limit",
            )),
            _ => {
                problem.save_to_file(x);
                Ok(())
            }
        }
    }

    fn run(
        &mut self,
        problem: &mut dyn Problem,
        x: &mut DVector<Floating>,
    ) -> Result<(), MinimizeError> {
        {
            let _timer = ScopedTimer::new(&self.timers.constraint_set_update);
            problem.solution_changed(x);
        }

        let mut grad = DVector::zeros(x.len());
        {
            let _timer = ScopedTimer::new(&self.timers.grad);
            problem.gradient(x, &mut grad);
        }
        let initial_grad_norm = grad.norm();
        if initial_grad_norm.is_nan() {
            return Err(self.fatal(
                Status::UserDefined,
                ErrorCode::NanEncountered,
                "Initial gradient is not a number",
            ));
        }
        if initial_grad_norm <= self.config.first_grad_norm_tol {
            info!(
                target: "minimizer",
                "Initial gradient norm {:.3e} is below the tolerance {:.3e}, nothing to solve",
                initial_grad_norm, self.config.first_grad_norm_tol
            );
            self.status = Status::GradNormConverged;
            self.current.grad_norm = grad.amax();
            return Ok(());
        }
        self.first_grad_norm = grad.amax();

        let mut trace = self.open_energy_trace();
        let mut f_old = Floating::NAN;

        loop {
            let f = {
                let _timer = ScopedTimer::new(&self.timers.obj_fun);
                problem.value(x)
            };
            if !f.is_finite() {
                return Err(self.fatal(
                    Status::NotANumber,
                    ErrorCode::NanEncountered,
                    &format!(
                        "Objective function is {f} at iteration {}",
                        self.current.iterations
                    ),
                ));
            }

            {
                let _timer = ScopedTimer::new(&self.timers.grad);
                problem.gradient(x, &mut grad);
            }
            if grad.iter().any(|v| v.is_nan()) {
                return Err(self.fatal(
                    Status::NotANumber,
                    ErrorCode::NanEncountered,
                    &format!("Gradient is not a number at iteration {}", self.current.iterations),
                ));
            }

            if self.config.debug_fd {
                self.audit_gradient(problem, x, &grad);
            }

            if let Some(trace) = trace.as_mut() {
                let components = if self.config.export_energy_components {
                    problem.energy_components(x)
                } else {
                    Vec::new()
                };
                if let Err(err) = trace.append(f, grad.norm(), &components) {
                    warn!(target: "minimizer", "Failed to append to the energy trace: {err}");
                }
            }

            let mut delta_x = match self.ladder.compute_direction(
                problem,
                x,
                &grad,
                self.current.iterations,
                &self.timers,
                &mut self.internal_solver,
            ) {
                Ok(direction) => direction,
                Err(err) => {
                    warn!(
                        target: "minimizer",
                        "{} direction failed ({err}), escalating",
                        self.ladder.current()
                    );
                    if self.ladder.escalate() {
                        continue;
                    }
                    return Err(self.fatal(
                        Status::UserDefined,
                        ErrorCode::LineSearchFailed,
                        "No descent strategy could produce a direction",
                    ));
                }
            };
            delta_x *= self.config.max_step_size;

            let descent = delta_x.dot(&grad);
            if descent >= 0.0 && grad.norm() > 0.0 {
                warn!(
                    target: "minimizer",
                    "{} direction is not a descent direction (dx.g = {:.3e}), escalating",
                    self.ladder.current(),
                    descent
                );
                if self.ladder.escalate() {
                    continue;
                }
                return Err(self.fatal(
                    Status::UserDefined,
                    ErrorCode::LineSearchFailed,
                    "No descent direction available",
                ));
            }

            let delta_x_norm = delta_x.norm();
            if delta_x_norm.is_nan() {
                warn!(target: "minimizer", "Direction norm is not a number, escalating");
                if self.ladder.escalate() {
                    continue;
                }
                return Err(self.fatal(
                    Status::NotANumber,
                    ErrorCode::NanEncountered,
                    "Direction norm is not a number",
                ));
            }

            self.current.x_delta = delta_x_norm / self.config.dt;
            self.current.f_delta = (f_old - f).abs();
            self.current.grad_norm = if self.config.relative_gradient {
                grad.amax() / self.first_grad_norm
            } else {
                grad.amax()
            };
            self.status = check_convergence(&self.stop, &self.current);
            if self.status != Status::Continue {
                info!(
                    target: "minimizer",
                    "Minimization completed ({}) in {} iterations",
                    self.status, self.current.iterations
                );
                break;
            }

            let rate = {
                let _timer = ScopedTimer::new(&self.timers.line_search);
                self.line_search
                    .compute_step_len(x, &delta_x, problem, f, &grad)
            };
            if rate.is_nan() {
                if self.ladder.escalate() {
                    warn!(target: "minimizer", "Line search failed, retrying with {}", self.ladder.current());
                    continue;
                }
                return Err(self.fatal(
                    Status::UserDefined,
                    ErrorCode::LineSearchFailed,
                    "Line search failed to find a descent step",
                ));
            }

            let x_old = x.clone();
            x.axpy(rate, &delta_x, 1.0);
            self.current.x_delta = (&*x - &x_old).amax();
            {
                let _timer = ScopedTimer::new(&self.timers.constraint_set_update);
                problem.solution_changed(x);
            }

            let step_norm = rate * delta_x_norm;
            trace!(
                target: "minimizer",
                "iter: {}, f = {:.9e}, ||g||_inf = {:.3e}, rate = {:.3e}, ||step|| = {:.3e}",
                self.current.iterations, f, self.current.grad_norm, rate, step_norm
            );
            if step_norm < STEP_TOO_SMALL_TOL && self.current.grad_norm > self.stop.grad_norm {
                return Err(self.fatal(
                    Status::UserDefined,
                    ErrorCode::StepTooSmall,
                    &format!(
                        "Step norm {step_norm:.3e} is too small while the gradient is above tolerance"
                    ),
                ));
            }

            self.ladder
                .note_accepted_step(self.config.fall_back_descent_strategy_period);

            problem.post_step(self.current.iterations, x);
            self.current.iterations += 1;
            f_old = f;
            if self.stop.iterations > 0 && self.current.iterations >= self.stop.iterations {
                warn!(
                    target: "minimizer",
                    "Minimization completed: reached the iteration limit ({})",
                    self.stop.iterations
                );
                self.status = Status::IterationLimit;
                break;
            }

            if problem.remesh(x) {
                info!(
                    target: "minimizer",
                    "Remesh: dimension {} -> {}, re-initializing solver state",
                    grad.len(),
                    x.len()
                );
                grad = DVector::zeros(x.len());
                self.ladder.on_remesh();
                let _timer = ScopedTimer::new(&self.timers.constraint_set_update);
                problem.solution_changed(x);
            }

            if !problem.callback(&self.current, x) {
                info!(
                    target: "minimizer",
                    "Stopped by the problem callback after {} iterations",
                    self.current.iterations
                );
                break;
            }
        }

        if self.config.check_saddle_point && self.status.is_converged() {
            if let Some(min_eigenvalue) = self.smallest_hessian_eigenvalue(problem, x) {
                if min_eigenvalue < -SADDLE_EIGENVALUE_TOL {
                    return Err(self.fatal(
                        Status::UserDefined,
                        ErrorCode::SaddlePoint,
                        &format!(
                            "Terminated at a saddle point (smallest eigenvalue {min_eigenvalue:.3e})"
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    fn fatal(&mut self, status: Status, error_code: ErrorCode, message: &str) -> MinimizeError {
        self.status = status;
        self.error_code = error_code;
        error!(target: "minimizer", "{message}");
        MinimizeError::new(status, error_code, message)
    }

    fn open_energy_trace(&self) -> Option<EnergyTrace> {
        let path = self.config.export_energy.as_ref()?;
        match EnergyTrace::create(path) {
            Ok(trace) => Some(trace),
            Err(err) => {
                warn!(target: "minimizer", "Could not open the energy trace {path:?}: {err}");
                None
            }
        }
    }

    /// Central finite difference along the normalized gradient. The analytic
    /// directional derivative there is the gradient norm itself.
    fn audit_gradient(
        &self,
        problem: &mut dyn Problem,
        x: &DVector<Floating>,
        grad: &DVector<Floating>,
    ) {
        let analytic = grad.norm();
        if analytic == 0.0 {
            return;
        }
        let h = self.config.debug_fd_eps;
        let direction = grad / analytic;

        let x_plus = x + h * &direction;
        problem.solution_changed(&x_plus);
        let f_plus = problem.value(&x_plus);

        let x_minus = x - h * &direction;
        problem.solution_changed(&x_minus);
        let f_minus = problem.value(&x_minus);

        problem.solution_changed(x);

        let finite_difference = (f_plus - f_minus) / (2.0 * h);
        if (finite_difference - analytic).abs() > (0.1 * analytic.abs()).max(1e-8) {
            error!(
                target: "minimizer",
                "Gradient audit mismatch: finite difference {finite_difference:.9e} vs analytic {analytic:.9e}"
            );
        } else {
            debug!(
                target: "minimizer",
                "Gradient audit match: finite difference {finite_difference:.9e} vs analytic {analytic:.9e}"
            );
        }
    }

    /// Densifies the terminal Hessian and returns its smallest eigenvalue, or
    /// None when the problem provides no second-order information.
    fn smallest_hessian_eigenvalue(
        &self,
        problem: &mut dyn Problem,
        x: &DVector<Floating>,
    ) -> Option<Floating> {
        let n = x.len();
        let mut hessian = SparseHessian::new(n);
        if !problem.hessian(x, &mut hessian) {
            return None;
        }
        let matrix = hessian.to_csc(0.0).ok()?;
        let sparse_dense = matrix.as_ref().to_dense();
        let mut dense = DMatrix::<Floating>::zeros(n, n);
        for j in 0..n {
            for i in 0..n {
                dense[(i, j)] = sparse_dense[(i, j)];
            }
        }
        let eigenvalues = dense.symmetric_eigen().eigenvalues;
        eigenvalues.iter().copied().reduce(Floating::min)
    }

    /// Aggregates the solver-info record. Per-phase times are averaged over
    /// accepted iterations, except for the total.
    fn finalize(&mut self) {
        let iterations = self.current.iterations.max(1) as Floating;
        let stats = self.line_search.stats();

        let mut info = serde_json::Map::new();
        info.insert("status".into(), serde_json::json!(self.status));
        info.insert("error_code".into(), serde_json::json!(self.error_code));
        info.insert(
            "iterations".into(),
            serde_json::json!(self.current.iterations),
        );
        info.insert("xDelta".into(), serde_json::json!(self.current.x_delta));
        info.insert("fDelta".into(), serde_json::json!(self.current.f_delta));
        info.insert("gradNorm".into(), serde_json::json!(self.current.grad_norm));
        info.insert("condition".into(), serde_json::json!(self.current.condition));
        info.insert(
            "relative_gradient".into(),
            serde_json::json!(self.config.relative_gradient),
        );
        info.insert("peak_memory".into(), serde_json::json!(peak_memory_bytes()));
        info.insert("total_time".into(), serde_json::json!(self.timers.total.get()));
        info.insert(
            "time_grad".into(),
            serde_json::json!(self.timers.grad.get() / iterations),
        );
        info.insert(
            "time_assembly".into(),
            serde_json::json!(self.timers.assembly.get() / iterations),
        );
        info.insert(
            "time_inverting".into(),
            serde_json::json!(self.timers.inverting.get() / iterations),
        );
        info.insert(
            "time_line_search".into(),
            serde_json::json!(self.timers.line_search.get() / iterations),
        );
        info.insert(
            "time_obj_fun".into(),
            serde_json::json!(self.timers.obj_fun.get() / iterations),
        );
        info.insert(
            "time_constraint_set_update".into(),
            serde_json::json!(self.timers.constraint_set_update.get() / iterations),
        );
        info.insert(
            "line_search_iterations".into(),
            serde_json::json!(stats.iterations.get()),
        );
        info.insert(
            "time_checking_for_nan_inf".into(),
            serde_json::json!(stats.time_checking_for_nan_inf.get() / iterations),
        );
        info.insert(
            "time_broad_phase_ccd".into(),
            serde_json::json!(stats.time_broad_phase_ccd.get() / iterations),
        );
        info.insert(
            "time_ccd".into(),
            serde_json::json!(stats.time_ccd.get() / iterations),
        );
        info.insert(
            "time_classical_line_search".into(),
            serde_json::json!(stats.time_classical_line_search.get() / iterations),
        );
        info.insert(
            "time_line_search_constraint_set_update".into(),
            serde_json::json!(stats.time_constraint_set_update.get() / iterations),
        );
        info.insert(
            "line_search".into(),
            serde_json::json!(self.line_search.name()),
        );
        info.insert(
            "descent_strategy_max".into(),
            serde_json::json!(self.ladder.max_reached().ordinal()),
        );
        info.insert(
            "strategy_escalations".into(),
            serde_json::json!(self.ladder.escalations()),
        );
        info.insert(
            "internal_solver".into(),
            serde_json::Value::Array(self.internal_solver.clone()),
        );
        info.insert(
            "internal_solver_first".into(),
            self.internal_solver
                .first()
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        );

        self.solver_info = info;
        if self.config.solver_info_log {
            info!(
                target: "minimizer",
                "Solver info: {}",
                serde_json::Value::Object(self.solver_info.clone())
            );
        }
    }
}

#[cfg(test)]
mod minimizer_tests {
    use super::*;

    struct Quadratic {
        center: DVector<Floating>,
    }

    impl Problem for Quadratic {
        fn value(&mut self, x: &DVector<Floating>) -> Floating {
            0.5 * (x - &self.center).dot(&(x - &self.center))
        }
        fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
            grad.copy_from(&(x - &self.center));
        }
        fn hessian(&mut self, x: &DVector<Floating>, hessian: &mut SparseHessian) -> bool {
            for i in 0..x.len() {
                hessian.add(i, i, 1.0);
            }
            true
        }
    }

    #[test]
    fn early_exit_leaves_iterate_untouched() {
        let center = DVector::from_vec(vec![0.25, -1.5]);
        let mut problem = Quadratic {
            center: center.clone(),
        };
        let mut minimizer = Minimizer::new(SolverConfig::default());
        let mut x = center.clone();
        minimizer.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(minimizer.current().iterations, 0);
        assert_eq!(*minimizer.status(), Status::GradNormConverged);
        assert_eq!(x, center);
    }

    #[test]
    fn converges_on_a_simple_quadratic() {
        let center = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let mut problem = Quadratic {
            center: center.clone(),
        };
        let mut minimizer = Minimizer::new(SolverConfig::default());
        let mut x = DVector::zeros(3);
        minimizer.minimize(&mut problem, &mut x).unwrap();
        assert!(minimizer.status().is_converged());
        assert!((x - center).amax() < 1e-6);
    }

    #[test]
    fn nan_objective_is_fatal() {
        struct NanAfter {
            calls: usize,
        }
        impl Problem for NanAfter {
            fn value(&mut self, x: &DVector<Floating>) -> Floating {
                self.calls += 1;
                if self.calls > 3 {
                    Floating::NAN
                } else {
                    x.dot(x)
                }
            }
            fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
                grad.copy_from(&(2.0 * x));
            }
        }

        let mut problem = NanAfter { calls: 0 };
        let mut config = SolverConfig::default();
        config.default_descent_strategy = DescentStrategy::GradientDescent;
        let mut minimizer = Minimizer::new(config);
        let mut x = DVector::from_vec(vec![10.0, -4.0]);
        let err = minimizer.minimize(&mut problem, &mut x).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::NanEncountered);
        assert_eq!(*minimizer.error_code(), ErrorCode::NanEncountered);
    }

    #[test]
    fn callback_stops_the_solve_cleanly() {
        struct Limited {
            inner: Quadratic,
        }
        impl Problem for Limited {
            fn value(&mut self, x: &DVector<Floating>) -> Floating {
                self.inner.value(x)
            }
            fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
                self.inner.gradient(x, grad)
            }
            fn callback(&mut self, current: &Criteria, _x: &DVector<Floating>) -> bool {
                current.iterations < 2
            }
        }

        let mut problem = Limited {
            inner: Quadratic {
                center: DVector::from_vec(vec![100.0, 100.0]),
            },
        };
        let mut config = SolverConfig::default();
        config.default_descent_strategy = DescentStrategy::GradientDescent;
        config.grad_norm = 1e-16;
        // half steps keep the quadratic from being solved exactly in one jump
        config.max_step_size = 0.5;
        let mut minimizer = Minimizer::new(config);
        let mut x = DVector::zeros(2);
        minimizer.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(minimizer.current().iterations, 2);
        assert_eq!(*minimizer.status(), Status::Continue);
    }

    #[test]
    fn iteration_limit_is_an_error() {
        struct SlowValley;
        impl Problem for SlowValley {
            fn value(&mut self, x: &DVector<Floating>) -> Floating {
                x.iter().map(|v| v.powi(4)).sum::<Floating>()
            }
            fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
                for (g, v) in grad.iter_mut().zip(x.iter()) {
                    *g = 4.0 * v.powi(3);
                }
            }
        }

        let mut problem = SlowValley;
        let mut config = SolverConfig::default();
        config.default_descent_strategy = DescentStrategy::GradientDescent;
        config.max_iterations = 3;
        let mut minimizer = Minimizer::new(config);
        // asymmetric start: steepest descent keeps bouncing across the valley
        let mut x = DVector::from_vec(vec![1.0, 0.5]);
        let err = minimizer.minimize(&mut problem, &mut x).unwrap_err();
        assert_eq!(err.status, Status::IterationLimit);
        assert!(err.message.contains("Reached iteration limit"));
    }

    #[test]
    fn saddle_point_is_detected_when_enabled() {
        // f = (x0^2 - x1^2) / 2 has a saddle at the origin with zero gradient
        // slightly off it along x0 only.
        struct Saddle;
        impl Problem for Saddle {
            fn value(&mut self, x: &DVector<Floating>) -> Floating {
                0.5 * (x[0] * x[0] - x[1] * x[1])
            }
            fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>) {
                grad[0] = x[0];
                grad[1] = -x[1];
            }
            fn hessian(&mut self, _x: &DVector<Floating>, hessian: &mut SparseHessian) -> bool {
                hessian.add(0, 0, 1.0);
                hessian.add(1, 1, -1.0);
                true
            }
        }

        let mut problem = Saddle;
        let mut config = SolverConfig::default();
        config.check_saddle_point = true;
        config.grad_norm = 1e-3;
        config.default_descent_strategy = DescentStrategy::GradientDescent;
        let mut minimizer = Minimizer::new(config);
        // On the x1 = 0 axis the solve converges straight into the saddle.
        let mut x = DVector::from_vec(vec![1e-2, 0.0]);
        let err = minimizer.minimize(&mut problem, &mut x).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::SaddlePoint);
    }

    #[test]
    fn solver_info_carries_the_contracted_keys() {
        let center = DVector::from_vec(vec![1.0, -1.0]);
        let mut problem = Quadratic { center };
        let mut minimizer = Minimizer::new(SolverConfig::default());
        let mut x = DVector::zeros(2);
        minimizer.minimize(&mut problem, &mut x).unwrap();

        let info = minimizer.solver_info();
        for key in [
            "status",
            "error_code",
            "iterations",
            "xDelta",
            "fDelta",
            "gradNorm",
            "condition",
            "relative_gradient",
            "peak_memory",
            "total_time",
            "time_grad",
            "time_assembly",
            "time_inverting",
            "time_line_search",
            "time_obj_fun",
            "time_constraint_set_update",
            "line_search_iterations",
            "time_checking_for_nan_inf",
            "time_broad_phase_ccd",
            "time_ccd",
            "time_classical_line_search",
            "time_line_search_constraint_set_update",
            "line_search",
            "internal_solver",
            "internal_solver_first",
        ] {
            assert!(info.contains_key(key), "missing solver info key {key}");
        }
        assert_eq!(info["line_search"], serde_json::json!("backtracking"));
        assert!(info["internal_solver"].as_array().is_some());
    }
}
