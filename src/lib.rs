use nalgebra::{DMatrix, DVector};

use tracing::{debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

// A minimizer for smooth unconstrained objectives f: R^n -> R with caller-supplied
// first- and second-order information. The solve loop asks a descent strategy for a
// direction, validates it, line-searches a step rate along it and repeats until a
// stop criterion triggers. Strategies are ordered Newton -> quasi-Newton -> gradient
// descent and the ladder escalates whenever the cheaper strategy fails (singular
// factorization, non-descent direction, exhausted line search), falling back to its
// configured default on a fixed cadence so a transient pathology does not degrade
// the rest of the solve.

pub mod tracer;
pub use tracer::*;

pub mod number;
pub use number::*;

pub mod config;
pub use config::*;

pub mod criteria;
pub use criteria::*;

pub mod problem;
pub use problem::*;

pub mod instrument;
pub use instrument::*;

pub mod linear_solver;
pub use linear_solver::*;

pub mod line_search;
pub use line_search::*;

pub mod descent;
pub use descent::*;

pub mod minimizer;
pub use minimizer::*;
