use super::*;

use faer::prelude::Solve;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::Col;

/// Sparse LU with reusable symbolic analysis. Robust default: handles the
/// indefinite regularized Hessians the Newton strategy can produce.
pub struct FaerLu {
    params: SolverParams,
    preconditioner: String,
    symbolic: Option<SymbolicLu<usize>>,
    factorization: Option<Lu<usize, Floating>>,
    dim: usize,
    num_factorizations: usize,
    num_solves: usize,
}

impl FaerLu {
    pub fn new(preconditioner: &str) -> Self {
        FaerLu {
            params: SolverParams::default(),
            preconditioner: preconditioner.to_string(),
            symbolic: None,
            factorization: None,
            dim: 0,
            num_factorizations: 0,
            num_solves: 0,
        }
    }
}

impl Default for FaerLu {
    fn default() -> Self {
        FaerLu::new("none")
    }
}

impl SparseLinearSolver for FaerLu {
    fn name(&self) -> &'static str {
        "faer::sparse::Lu"
    }

    fn set_parameters(&mut self, params: &SolverParams) {
        self.params = params.clone();
    }

    fn analyze_pattern(
        &mut self,
        matrix: &faer::sparse::SparseColMat<usize, Floating>,
    ) -> Result<(), LinearSolverError> {
        self.factorization = None;
        self.dim = matrix.nrows();
        self.symbolic = Some(
            SymbolicLu::try_new(matrix.symbolic()).map_err(|_| LinearSolverError::Singular)?,
        );
        Ok(())
    }

    fn factorize(
        &mut self,
        matrix: &faer::sparse::SparseColMat<usize, Floating>,
    ) -> Result<(), LinearSolverError> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::PatternNotAnalyzed)?;
        self.factorization = Some(
            Lu::try_new_with_symbolic(symbolic.clone(), matrix.as_ref())
                .map_err(|_| LinearSolverError::Singular)?,
        );
        self.num_factorizations += 1;
        Ok(())
    }

    fn solve(
        &mut self,
        rhs: &DVector<Floating>,
        solution: &mut DVector<Floating>,
    ) -> Result<(), LinearSolverError> {
        let factorization = self
            .factorization
            .as_ref()
            .ok_or(LinearSolverError::NotFactorized)?;
        let b = Col::from_fn(rhs.len(), |i| rhs[i]);
        let x = factorization.solve(&b);
        for (dst, src) in solution.iter_mut().zip(x.iter()) {
            *dst = *src;
        }
        self.num_solves += 1;
        Ok(())
    }

    fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "solver": self.name(),
            "preconditioner": self.preconditioner,
            "dim": self.dim,
            "num_factorizations": self.num_factorizations,
            "num_solves": self.num_solves,
            "tolerance": self.params.tolerance,
        })
    }
}
