use super::*;
use faer::sparse::{SparseColMat, Triplet};

/// Triplet buffer a problem assembles its Hessian into. Duplicate entries are
/// summed on conversion, so element-wise assembly can push overlapping blocks.
#[derive(Debug, Default)]
pub struct SparseHessian {
    dim: usize,
    triplets: Vec<Triplet<usize, usize, Floating>>,
}

impl SparseHessian {
    pub fn new(dim: usize) -> Self {
        SparseHessian {
            dim,
            triplets: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.triplets.len()
    }

    pub fn clear(&mut self) {
        self.triplets.clear();
    }

    /// Drops all entries and sets a new dimension.
    pub fn resize(&mut self, dim: usize) {
        self.dim = dim;
        self.triplets.clear();
    }

    pub fn add(&mut self, row: usize, col: usize, value: Floating) {
        self.triplets.push(Triplet {
            row,
            col,
            val: value,
        });
    }

    /// Compressed-column matrix with `diagonal_shift * I` added.
    pub fn to_csc(
        &self,
        diagonal_shift: Floating,
    ) -> Result<SparseColMat<usize, Floating>, LinearSolverError> {
        let mut triplets = self.triplets.clone();
        if diagonal_shift != 0.0 {
            for i in 0..self.dim {
                triplets.push(Triplet {
                    row: i,
                    col: i,
                    val: diagonal_shift,
                });
            }
        }
        SparseColMat::try_new_from_triplets(self.dim, self.dim, &triplets)
            .map_err(|_| LinearSolverError::MalformedMatrix)
    }
}

/// The problem contract. `value` and `gradient` are mandatory; everything else
/// is an optional capability with a no-op default. Ordering guarantees given to
/// implementors: `solution_changed` is called before any evaluation at a new
/// point, `post_step` after each accepted step, `remesh` last in an iteration.
pub trait Problem {
    fn value(&mut self, x: &DVector<Floating>) -> Floating;

    fn gradient(&mut self, x: &DVector<Floating>, grad: &mut DVector<Floating>);

    /// Writes the sparse symmetric Hessian at `x` and returns true, or returns
    /// false when second-order information is not available.
    fn hessian(&mut self, _x: &DVector<Floating>, _hessian: &mut SparseHessian) -> bool {
        false
    }

    /// The iterate moved; refresh any internal caches.
    fn solution_changed(&mut self, _x: &DVector<Floating>) {}

    /// Polled once per iteration; returning false stops the solve cleanly.
    fn callback(&mut self, _current: &Criteria, _x: &DVector<Floating>) -> bool {
        true
    }

    fn post_step(&mut self, _iteration: usize, _x: &DVector<Floating>) {}

    /// Returns true when the topology changed. The problem may resize `x` in
    /// place; the minimizer then re-initializes all dimension-dependent state.
    fn remesh(&mut self, _x: &mut DVector<Floating>) -> bool {
        false
    }

    /// Optional checkpoint hook, invoked when a solve finishes cleanly.
    fn save_to_file(&mut self, _x: &DVector<Floating>) {}

    /// Feasibility filter for a candidate step, e.g. a collision check.
    fn is_step_valid(&mut self, _x0: &DVector<Floating>, _x1: &DVector<Floating>) -> bool {
        true
    }

    /// Largest admissible fraction of the step `x0 -> x1`, in (0, 1].
    fn max_step_from(&mut self, _x0: &DVector<Floating>, _x1: &DVector<Floating>) -> Floating {
        1.0
    }

    /// Per-component `(value, gradient norm)` pairs for the energy trace.
    fn energy_components(&mut self, _x: &DVector<Floating>) -> Vec<(Floating, Floating)> {
        Vec::new()
    }
}
