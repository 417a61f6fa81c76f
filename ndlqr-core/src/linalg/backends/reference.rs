//! Backend built directly on the hand-written kernels.

use crate::linalg::backend::{BackendError, BackendKind, DenseBackend};
use crate::linalg::dense::{MatView, MatViewMut};
use crate::linalg::kernels;

/// Dependency-free backend. The factor lives entirely in the lower triangle
/// of the factored block, so its handle is empty and owns no memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl DenseBackend for ReferenceBackend {
    type Factor = ();

    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn add(&self, a: MatView<'_>, b: MatViewMut<'_>, alpha: f64) -> Result<(), BackendError> {
        kernels::add(a, b, alpha)
    }

    fn gemm(
        &self,
        a: MatView<'_>,
        b: MatView<'_>,
        c: MatViewMut<'_>,
        trans_a: bool,
        trans_b: bool,
        alpha: f64,
        beta: f64,
    ) -> Result<(), BackendError> {
        kernels::gemm(a, b, c, trans_a, trans_b, alpha, beta)
    }

    fn symm(&self, a: MatView<'_>, b: MatView<'_>, c: MatViewMut<'_>, alpha: f64, beta: f64) -> Result<(), BackendError> {
        kernels::symm(a, b, c, alpha, beta)
    }

    fn cholesky_factor(&self, a: MatViewMut<'_>) -> Result<(), BackendError> {
        kernels::cholesky_lower(a)
    }

    fn cholesky_solve(&self, l: MatView<'_>, _factor: &(), b: MatViewMut<'_>) -> Result<(), BackendError> {
        kernels::cholesky_solve_lower(l, b)
    }

    fn owns_factor_memory(&self) -> bool {
        false
    }
}
