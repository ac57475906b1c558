use super::*;

/// Outcome classification of a solve, updated once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Status {
    Continue,
    GradNormConverged,
    XDeltaConverged,
    FDeltaConverged,
    IterationLimit,
    UserDefined,
    NotANumber,
}

impl Status {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            Status::GradNormConverged | Status::XDeltaConverged | Status::FDeltaConverged
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Continue => "continue",
            Status::GradNormConverged => "gradient norm converged",
            Status::XDeltaConverged => "iterate delta converged",
            Status::FDeltaConverged => "energy delta converged",
            Status::IterationLimit => "iteration limit",
            Status::UserDefined => "user defined",
            Status::NotANumber => "not a number",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorCode {
    Success,
    NanEncountered,
    StepTooSmall,
    LineSearchFailed,
    SaddlePoint,
}

/// Scalar stop thresholds, and the per-iteration record checked against them.
/// A threshold at zero is disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    pub iterations: usize,
    pub x_delta: Floating,
    pub f_delta: Floating,
    pub grad_norm: Floating,
    pub condition: Floating,
}

impl Criteria {
    /// Fresh `current` record. `f_delta` and `grad_norm` start as NaN so no
    /// threshold can trigger before the first evaluation.
    pub fn new_current() -> Self {
        Criteria {
            iterations: 0,
            x_delta: 0.0,
            f_delta: Floating::NAN,
            grad_norm: Floating::NAN,
            condition: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Criteria::new_current();
    }
}

pub fn check_convergence(stop: &Criteria, current: &Criteria) -> Status {
    if stop.iterations > 0 && current.iterations >= stop.iterations {
        return Status::IterationLimit;
    }
    if stop.grad_norm > 0.0 && current.grad_norm <= stop.grad_norm {
        return Status::GradNormConverged;
    }
    if stop.f_delta > 0.0 && current.f_delta <= stop.f_delta {
        return Status::FDeltaConverged;
    }
    if stop.x_delta > 0.0 && current.x_delta <= stop.x_delta {
        return Status::XDeltaConverged;
    }
    Status::Continue
}

#[cfg(test)]
mod criteria_tests {
    use super::*;

    fn stop() -> Criteria {
        Criteria {
            iterations: 100,
            x_delta: 0.0,
            f_delta: 1e-9,
            grad_norm: 1e-7,
            condition: 0.0,
        }
    }

    #[test]
    fn fresh_record_does_not_converge() {
        let current = Criteria::new_current();
        assert_eq!(check_convergence(&stop(), &current), Status::Continue);
    }

    #[test]
    fn iteration_limit_wins_over_tolerances() {
        let mut current = Criteria::new_current();
        current.iterations = 100;
        current.grad_norm = 0.0;
        assert_eq!(check_convergence(&stop(), &current), Status::IterationLimit);
    }

    #[test]
    fn grad_norm_tolerance() {
        let mut current = Criteria::new_current();
        current.iterations = 3;
        current.grad_norm = 1e-8;
        assert_eq!(
            check_convergence(&stop(), &current),
            Status::GradNormConverged
        );
    }

    #[test]
    fn disabled_threshold_is_ignored() {
        let mut thresholds = stop();
        thresholds.f_delta = 0.0;
        let mut current = Criteria::new_current();
        current.iterations = 1;
        current.f_delta = 0.0;
        current.grad_norm = 1.0;
        assert_eq!(check_convergence(&thresholds, &current), Status::Continue);
    }

    #[test]
    fn f_delta_tolerance() {
        let mut current = Criteria::new_current();
        current.iterations = 7;
        current.grad_norm = 1.0;
        current.f_delta = 1e-12;
        assert_eq!(check_convergence(&stop(), &current), Status::FDeltaConverged);
    }
}
