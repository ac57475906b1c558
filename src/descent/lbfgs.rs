use super::*;
use std::collections::VecDeque;

pub const DEFAULT_LBFGS_HISTORY: usize = 6;

/// Limited-memory BFGS direction from the classic two-loop recursion over a
/// bounded history of `(s, y, 1/y.s)` corrections, with the usual `gamma`
/// scaling of the seed inverse Hessian. Pairs violating the curvature
/// condition are skipped, so the implicit inverse Hessian stays positive
/// definite and the direction stays a descent direction.
pub struct LbfgsDirection {
    history: VecDeque<(DVector<Floating>, DVector<Floating>, Floating)>,
    max_history: usize,
    previous: Option<(DVector<Floating>, DVector<Floating>)>,
}

impl LbfgsDirection {
    pub fn new(max_history: usize) -> Self {
        LbfgsDirection {
            history: VecDeque::with_capacity(max_history),
            max_history,
            previous: None,
        }
    }

    /// Forgets all corrections; used on escalation into the strategy, on
    /// remesh and on per-solve reset.
    pub fn clear(&mut self) {
        self.history.clear();
        self.previous = None;
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn compute(
        &mut self,
        x: &DVector<Floating>,
        grad: &DVector<Floating>,
    ) -> DVector<Floating> {
        if let Some((x_prev, grad_prev)) = &self.previous {
            if x_prev.len() == x.len() {
                let s = x - x_prev;
                let y = grad - grad_prev;
                let ys = y.dot(&s);
                if ys > 1e-12 {
                    if self.history.len() == self.max_history {
                        self.history.pop_front();
                    }
                    self.history.push_back((s, y, 1.0 / ys));
                } else {
                    trace!(target: "lbfgs", "Skipping correction pair with curvature {ys:.3e}");
                }
            } else {
                self.history.clear();
            }
        }
        self.previous = Some((x.clone(), grad.clone()));

        let mut q = grad.clone();
        let mut alphas = Vec::with_capacity(self.history.len());
        for (s, y, rho) in self.history.iter().rev() {
            let alpha = rho * s.dot(&q);
            q.axpy(-alpha, y, 1.0);
            alphas.push(alpha);
        }

        let gamma = match self.history.back() {
            Some((s, y, _)) => {
                let yy = y.dot(y);
                if yy > 0.0 {
                    s.dot(y) / yy
                } else {
                    1.0
                }
            }
            None => 1.0,
        };

        let mut r = q * gamma;
        for ((s, y, rho), alpha) in self.history.iter().zip(alphas.iter().rev()) {
            let beta = rho * y.dot(&r);
            r.axpy(alpha - beta, s, 1.0);
        }
        -r
    }
}
