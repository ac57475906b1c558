use super::*;
use std::path::PathBuf;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// Selector for the line-search variant: "backtracking", "armijo" or "none".
    pub method: String,
    /// When positive, a trial step is also accepted if the gradient norm at the
    /// trial point falls below this threshold, even without an energy decrease.
    pub use_grad_norm_tol: Floating,
    pub max_iterations: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        LineSearchConfig {
            method: "backtracking".to_string(),
            use_grad_norm_tol: 0.0,
            max_iterations: 30,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Stop thresholds; a threshold of zero is disabled.
    pub x_delta: Floating,
    pub f_delta: Floating,
    pub grad_norm: Floating,
    pub max_iterations: usize,

    /// Report the gradient norm relative to the first-iteration gradient norm.
    pub relative_gradient: bool,

    pub min_step_size: Floating,
    pub max_step_size: Floating,

    /// Early-exit tolerance on the initial gradient norm: at or below it the
    /// solve returns immediately without touching the iterate.
    pub first_grad_norm_tol: Floating,

    /// Accepted iterations between resets of the descent strategy to its default.
    pub fall_back_descent_strategy_period: usize,

    pub line_search: LineSearchConfig,

    /// Audit the analytic gradient with a central finite difference each iteration.
    pub debug_fd: bool,
    pub debug_fd_eps: Floating,

    /// Probe the Hessian spectrum at the terminal iterate and fail on a saddle.
    pub check_saddle_point: bool,

    /// Log the aggregated solver-info record at the end of the solve.
    pub solver_info_log: bool,
    /// Per-iteration energy trace file, one `<energy>,<grad norm>` row per iteration.
    pub export_energy: Option<PathBuf>,
    /// Also append per-component `<value>,<grad norm>` columns to each trace row.
    pub export_energy_components: bool,

    /// Sparse linear solver selector ("lu" or "llt") and preconditioner selector.
    pub solver: String,
    pub preconditioner: String,

    pub default_descent_strategy: DescentStrategy,

    /// Diagonal shift added to the Hessian before factorization.
    pub hessian_regularization: Floating,

    /// Time-step used to scale the pre-step `x_delta` criterion.
    pub dt: Floating,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            x_delta: 0.0,
            f_delta: 0.0,
            grad_norm: 1e-7,
            max_iterations: 100,
            relative_gradient: false,
            min_step_size: 1e-10,
            max_step_size: 1.0,
            first_grad_norm_tol: 1e-10,
            fall_back_descent_strategy_period: 5,
            line_search: LineSearchConfig::default(),
            debug_fd: false,
            debug_fd_eps: 1e-7,
            check_saddle_point: false,
            solver_info_log: false,
            export_energy: None,
            export_energy_components: false,
            solver: "lu".to_string(),
            preconditioner: "none".to_string(),
            default_descent_strategy: DescentStrategy::Newton,
            hessian_regularization: 1e-5,
            dt: 1.0,
        }
    }
}
