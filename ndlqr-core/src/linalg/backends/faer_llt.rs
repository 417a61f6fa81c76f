//! Dense Cholesky backend using faer's LLT.

use crate::linalg::backend::{BackendError, BackendKind, DenseBackend};
use crate::linalg::dense::{MatView, MatViewMut};
use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{Llt, LltError, Solve};
use faer::{Accum, Mat, MatMut, MatRef, Par, Side};

/// Backend built on `faer`.
///
/// Blocks are small, so products run sequentially; parallelism comes from the
/// solver's own work partitioning.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerBackend;

fn as_ref<'a>(m: &MatView<'a>) -> MatRef<'a, f64> {
    MatRef::from_column_major_slice(m.as_slice(), m.nrows(), m.ncols())
}

fn prescale(c: &mut MatViewMut<'_>, beta: f64) -> Accum {
    if beta == 0.0 {
        return Accum::Replace;
    }
    if beta != 1.0 {
        c.scale(beta);
    }
    Accum::Add
}

impl DenseBackend for FaerBackend {
    type Factor = Llt<f64>;

    fn kind(&self) -> BackendKind {
        BackendKind::Faer
    }

    fn add(&self, a: MatView<'_>, mut b: MatViewMut<'_>, alpha: f64) -> Result<(), BackendError> {
        if a.shape() != b.shape() {
            return Err(BackendError::DimensionMismatch { what: "add", expected: b.shape(), actual: a.shape() });
        }
        for (bi, ai) in b.as_mut_slice().iter_mut().zip(a.as_slice()) {
            *bi += alpha * ai;
        }
        Ok(())
    }

    fn gemm(
        &self,
        a: MatView<'_>,
        b: MatView<'_>,
        mut c: MatViewMut<'_>,
        trans_a: bool,
        trans_b: bool,
        alpha: f64,
        beta: f64,
    ) -> Result<(), BackendError> {
        let lhs = if trans_a { as_ref(&a).transpose() } else { as_ref(&a) };
        let rhs = if trans_b { as_ref(&b).transpose() } else { as_ref(&b) };
        if lhs.ncols() != rhs.nrows() || (lhs.nrows(), rhs.ncols()) != c.shape() {
            return Err(BackendError::DimensionMismatch {
                what: "gemm",
                expected: c.shape(),
                actual: (lhs.nrows(), rhs.ncols()),
            });
        }
        let accum = prescale(&mut c, beta);
        let (nrows, ncols) = c.shape();
        let dst = MatMut::from_column_major_slice_mut(c.as_mut_slice(), nrows, ncols);
        matmul(dst, accum, lhs, rhs, alpha, Par::Seq);
        Ok(())
    }

    fn symm(&self, a: MatView<'_>, b: MatView<'_>, mut c: MatViewMut<'_>, alpha: f64, beta: f64) -> Result<(), BackendError> {
        if !a.is_square() {
            return Err(BackendError::NotSquare(a.shape()));
        }
        if a.ncols() != b.nrows() || b.shape() != c.shape() {
            return Err(BackendError::DimensionMismatch { what: "symm", expected: c.shape(), actual: b.shape() });
        }
        let n = a.nrows();
        let full = Mat::from_fn(n, n, |i, j| if i >= j { a.get(i, j) } else { a.get(j, i) });
        let accum = prescale(&mut c, beta);
        let (nrows, ncols) = c.shape();
        let dst = MatMut::from_column_major_slice_mut(c.as_mut_slice(), nrows, ncols);
        matmul(dst, accum, full.as_ref(), as_ref(&b), alpha, Par::Seq);
        Ok(())
    }

    fn cholesky_factor(&self, mut a: MatViewMut<'_>) -> Result<Self::Factor, BackendError> {
        let (n, ncols) = a.shape();
        if n != ncols {
            return Err(BackendError::NotSquare((n, ncols)));
        }
        let llt = MatRef::from_column_major_slice(a.as_slice(), n, n)
            .llt(Side::Lower)
            .map_err(|e| match e {
                LltError::NonPositivePivot { index } => BackendError::NotPositiveDefinite { column: index },
            })?;
        {
            let l = llt.L();
            for j in 0..n {
                for i in j..n {
                    a.set(i, j, l[(i, j)]);
                }
            }
        }
        Ok(llt)
    }

    fn cholesky_solve(&self, l: MatView<'_>, factor: &Self::Factor, mut b: MatViewMut<'_>) -> Result<(), BackendError> {
        let n = l.nrows();
        if b.nrows() != n {
            return Err(BackendError::DimensionMismatch { what: "cholesky solve", expected: (n, b.ncols()), actual: b.shape() });
        }
        let (nrows, ncols) = b.shape();
        factor.solve_in_place(MatMut::from_column_major_slice_mut(b.as_mut_slice(), nrows, ncols));
        Ok(())
    }

    fn owns_factor_memory(&self) -> bool {
        true
    }
}
