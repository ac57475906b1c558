use super::*;

pub mod newton;
pub use newton::*;
pub mod lbfgs;
pub use lbfgs::*;
pub mod gradient;
pub use gradient::*;

/// Ordered descent strategies. Escalation only moves down the ladder; the
/// ordinal never decreases within a streak between resets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum DescentStrategy {
    #[default]
    Newton,
    QuasiNewton,
    GradientDescent,
}

impl DescentStrategy {
    pub fn ordinal(self) -> usize {
        match self {
            DescentStrategy::Newton => 0,
            DescentStrategy::QuasiNewton => 1,
            DescentStrategy::GradientDescent => 2,
        }
    }

    pub fn next(self) -> Option<DescentStrategy> {
        match self {
            DescentStrategy::Newton => Some(DescentStrategy::QuasiNewton),
            DescentStrategy::QuasiNewton => Some(DescentStrategy::GradientDescent),
            DescentStrategy::GradientDescent => None,
        }
    }
}

impl std::fmt::Display for DescentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DescentStrategy::Newton => "Newton",
            DescentStrategy::QuasiNewton => "quasi-Newton",
            DescentStrategy::GradientDescent => "gradient descent",
        };
        write!(f, "{name}")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DirectionError {
    #[error("Problem provides no Hessian")]
    HessianUnavailable,
    #[error("Linear solver failed: {0}")]
    LinearSolver(#[from] LinearSolverError),
    #[error("Direction is not finite")]
    NonFinite,
}

/// Owns the three direction providers and the escalation state between them.
pub struct StrategyLadder {
    default_strategy: DescentStrategy,
    current: DescentStrategy,
    max_reached: DescentStrategy,
    escalations: usize,
    accepted_since_reset: usize,
    newton: NewtonDirection,
    lbfgs: LbfgsDirection,
    gradient: GradientDirection,
}

impl StrategyLadder {
    pub fn new(config: &SolverConfig) -> Self {
        StrategyLadder {
            default_strategy: config.default_descent_strategy,
            current: config.default_descent_strategy,
            max_reached: config.default_descent_strategy,
            escalations: 0,
            accepted_since_reset: 0,
            newton: NewtonDirection::new(config),
            lbfgs: LbfgsDirection::new(DEFAULT_LBFGS_HISTORY),
            gradient: GradientDirection,
        }
    }

    pub fn current(&self) -> DescentStrategy {
        self.current
    }

    pub fn max_reached(&self) -> DescentStrategy {
        self.max_reached
    }

    pub fn escalations(&self) -> usize {
        self.escalations
    }

    /// Per-solve reset back to the configured default.
    pub fn reset(&mut self) {
        self.current = self.default_strategy;
        self.max_reached = self.default_strategy;
        self.escalations = 0;
        self.accepted_since_reset = 0;
        self.newton.invalidate();
        self.lbfgs.clear();
    }

    /// The variable changed meaning or dimension: cached factorizations and
    /// the quasi-Newton history are both stale.
    pub fn on_remesh(&mut self) {
        self.newton.invalidate();
        self.lbfgs.clear();
    }

    /// Moves one strategy down the ladder. Returns false when already at
    /// gradient descent, the terminal fallback.
    pub fn escalate(&mut self) -> bool {
        match self.current.next() {
            Some(next) => {
                warn!(
                    target: "strategy ladder",
                    "Escalating descent strategy: {} -> {}",
                    self.current, next
                );
                if next == DescentStrategy::QuasiNewton {
                    self.lbfgs.clear();
                }
                self.current = next;
                self.max_reached = self.max_reached.max(next);
                self.escalations += 1;
                true
            }
            None => false,
        }
    }

    /// Called once per accepted step; every `period` accepted steps the ladder
    /// drops back to its default so a transient pathology does not pin the
    /// solve on a slow strategy.
    pub fn note_accepted_step(&mut self, period: usize) {
        self.accepted_since_reset += 1;
        if period > 0 && self.accepted_since_reset >= period {
            self.accepted_since_reset = 0;
            if self.current != self.default_strategy {
                debug!(
                    target: "strategy ladder",
                    "Falling back to the default descent strategy: {} -> {}",
                    self.current, self.default_strategy
                );
            }
            self.current = self.default_strategy;
        }
    }

    pub fn compute_direction(
        &mut self,
        problem: &mut dyn Problem,
        x: &DVector<Floating>,
        grad: &DVector<Floating>,
        iterations: usize,
        timers: &PhaseTimers,
        internal_solver: &mut Vec<serde_json::Value>,
    ) -> Result<DVector<Floating>, DirectionError> {
        match self.current {
            DescentStrategy::Newton => {
                self.newton
                    .compute(problem, x, grad, iterations, timers, internal_solver)
            }
            DescentStrategy::QuasiNewton => Ok(self.lbfgs.compute(x, grad)),
            DescentStrategy::GradientDescent => Ok(self.gradient.compute(grad)),
        }
    }
}
