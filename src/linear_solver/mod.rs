use super::*;

pub mod lu;
pub use lu::*;
pub mod llt;
pub use llt::*;

use faer::sparse::SparseColMat;

#[derive(thiserror::Error, Debug)]
pub enum LinearSolverError {
    #[error("Matrix is singular or not positive definite")]
    Singular,
    #[error("Sparsity pattern has not been analyzed")]
    PatternNotAnalyzed,
    #[error("No numeric factorization available")]
    NotFactorized,
    #[error("Malformed sparse matrix")]
    MalformedMatrix,
}

/// Tuning options accepted by every backend; direct factorizations only record
/// them in their info, iterative backends would act on them.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub tolerance: Floating,
    pub max_iters: usize,
    pub preconditioner_type: String,
    pub reorder: bool,
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            tolerance: 1e-10,
            max_iters: 1000,
            preconditioner_type: "none".to_string(),
            reorder: true,
        }
    }
}

/// A sparse factorization backend. The symbolic analysis from `analyze_pattern`
/// stays valid across `factorize` calls until the pattern is re-analyzed;
/// `factorize` invalidates nothing on failure, it only reports it.
pub trait SparseLinearSolver {
    fn name(&self) -> &'static str;

    fn set_parameters(&mut self, params: &SolverParams);

    /// Records the symbolic structure of `matrix` and drops any numeric factor.
    fn analyze_pattern(
        &mut self,
        matrix: &SparseColMat<usize, Floating>,
    ) -> Result<(), LinearSolverError>;

    /// Computes the numeric factorization for the last analyzed pattern.
    fn factorize(
        &mut self,
        matrix: &SparseColMat<usize, Floating>,
    ) -> Result<(), LinearSolverError>;

    /// Solves `A x = b` with the current factorization.
    fn solve(
        &mut self,
        rhs: &DVector<Floating>,
        solution: &mut DVector<Floating>,
    ) -> Result<(), LinearSolverError>;

    /// Diagnostics of the backend so far.
    fn info(&self) -> serde_json::Value;
}

/// Backend factory. Unknown selectors fall back to LU.
pub fn new_sparse_solver(name: &str, preconditioner: &str) -> Box<dyn SparseLinearSolver> {
    match name {
        "lu" => Box::new(FaerLu::new(preconditioner)),
        "llt" | "cholesky" => Box::new(FaerLlt::new(preconditioner)),
        other => {
            warn!(target: "linear solver", "Unknown sparse solver {other:?}, falling back to LU");
            Box::new(FaerLu::new(preconditioner))
        }
    }
}

#[cfg(test)]
mod linear_solver_tests {
    use super::*;

    fn spd_matrix(n: usize) -> SparseColMat<usize, Floating> {
        let mut hessian = SparseHessian::new(n);
        for i in 0..n {
            hessian.add(i, i, 2.5);
            if i + 1 < n {
                hessian.add(i, i + 1, -1.0);
                hessian.add(i + 1, i, -1.0);
            }
        }
        hessian.to_csc(0.0).unwrap()
    }

    fn solve_roundtrip(solver: &mut dyn SparseLinearSolver) {
        let n = 8;
        let matrix = spd_matrix(n);
        solver.analyze_pattern(&matrix).unwrap();
        solver.factorize(&matrix).unwrap();

        let expected = DVector::from_fn(n, |i, _| 1.0 + i as Floating);
        let dense = matrix.as_ref().to_dense();
        let rhs = DVector::from_fn(n, |i, _| {
            (0..n).map(|j| dense[(i, j)] * expected[j]).sum::<Floating>()
        });

        let mut solution = DVector::zeros(n);
        solver.solve(&rhs, &mut solution).unwrap();
        assert!((solution - expected).amax() < 1e-10);
    }

    #[test]
    fn lu_solves_spd_system() {
        let mut solver = FaerLu::new("none");
        solve_roundtrip(&mut solver);
    }

    #[test]
    fn llt_solves_spd_system() {
        let mut solver = FaerLlt::new("none");
        solve_roundtrip(&mut solver);
    }

    #[test]
    fn llt_rejects_indefinite_matrix() {
        let mut hessian = SparseHessian::new(2);
        hessian.add(0, 0, 1e-5);
        hessian.add(1, 1, -1.0);
        let matrix = hessian.to_csc(0.0).unwrap();
        let mut solver = FaerLlt::new("none");
        solver.analyze_pattern(&matrix).unwrap();
        assert!(matches!(
            solver.factorize(&matrix),
            Err(LinearSolverError::Singular)
        ));
    }

    #[test]
    fn solve_without_factorization_is_an_error() {
        let mut solver = FaerLu::new("none");
        let mut solution = DVector::zeros(2);
        let rhs = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            solver.solve(&rhs, &mut solution),
            Err(LinearSolverError::NotFactorized)
        ));
    }

    #[test]
    fn factory_falls_back_to_lu() {
        let solver = new_sparse_solver("does-not-exist", "none");
        assert_eq!(solver.name(), "faer::sparse::Lu");
    }
}
