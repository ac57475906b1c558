use super::*;

/// Steepest descent, the terminal fallback: always a descent direction for a
/// nonzero gradient, no state to invalidate.
#[derive(Default)]
pub struct GradientDirection;

impl GradientDirection {
    pub fn compute(&self, grad: &DVector<Floating>) -> DVector<Floating> {
        -grad
    }
}
