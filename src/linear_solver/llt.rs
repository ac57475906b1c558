use super::*;

use faer::prelude::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::{Col, Side};

/// Sparse Cholesky for SPD systems. Factorization fails on an indefinite
/// matrix, which is exactly the escalation signal the descent ladder wants.
pub struct FaerLlt {
    params: SolverParams,
    preconditioner: String,
    symbolic: Option<SymbolicLlt<usize>>,
    factorization: Option<Llt<usize, Floating>>,
    dim: usize,
    num_factorizations: usize,
    num_solves: usize,
}

impl FaerLlt {
    pub fn new(preconditioner: &str) -> Self {
        FaerLlt {
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

impl Default for FaerLlt {
    fn default() -> Self {
        FaerLlt::new("none")
    }
}

impl SparseLinearSolver for FaerLlt {
    fn name(&self) -> &'static str {
        "faer::sparse::Llt"
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
            SymbolicLlt::try_new(matrix.symbolic(), Side::Lower)
                .map_err(|_| LinearSolverError::Singular)?,
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
            Llt::try_new_with_symbolic(symbolic.clone(), matrix.as_ref(), Side::Lower)
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
