use super::dense::{MatView, MatViewMut};
use super::kernels;
use nalgebra::{Cholesky, DMatrix, DMatrixView, DMatrixViewMut, Dyn};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error("dimension mismatch in {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("matrix of shape {0:?} is not square")]
    NotSquare((usize, usize)),
    #[error("matrix is not positive definite (failed at column {column})")]
    NotPositiveDefinite { column: usize },
    #[error("no live factorization in this cache slot")]
    MissingFactor,
}

/// Which backend produced a factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Reference,
    Nalgebra,
    Faer,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Reference => "reference",
            BackendKind::Nalgebra => "nalgebra",
            BackendKind::Faer => "faer",
        };
        f.write_str(name)
    }
}

/// Dense kernels required by the nested-dissection solver.
///
/// All matrices are column-major views. `cholesky_factor` overwrites the lower
/// triangle of its argument with `L` and returns a handle that later
/// `cholesky_solve` calls may use instead of (or in addition to) the stored
/// `L`. Backends whose handles own memory report it through
/// [`DenseBackend::owns_factor_memory`].
pub trait DenseBackend: Send + Sync {
    type Factor: Send + Sync;

    fn kind(&self) -> BackendKind;

    /// `b += alpha * a`
    fn add(&self, a: MatView<'_>, b: MatViewMut<'_>, alpha: f64) -> Result<(), BackendError>;

    /// `c = alpha * op(a) * op(b) + beta * c`
    fn gemm(
        &self,
        a: MatView<'_>,
        b: MatView<'_>,
        c: MatViewMut<'_>,
        trans_a: bool,
        trans_b: bool,
        alpha: f64,
        beta: f64,
    ) -> Result<(), BackendError>;

    /// `c = alpha * a * b + beta * c` for symmetric `a` (lower triangle read).
    fn symm(&self, a: MatView<'_>, b: MatView<'_>, c: MatViewMut<'_>, alpha: f64, beta: f64) -> Result<(), BackendError>;

    fn cholesky_factor(&self, a: MatViewMut<'_>) -> Result<Self::Factor, BackendError>;

    /// Solve `A x = b` in place. `l` is the lower factor written by
    /// `cholesky_factor`.
    fn cholesky_solve(&self, l: MatView<'_>, factor: &Self::Factor, b: MatViewMut<'_>) -> Result<(), BackendError>;

    fn owns_factor_memory(&self) -> bool;

    fn release(&self, factor: Self::Factor) {
        drop(factor);
    }
}

/// Default backend built on `nalgebra`.
///
/// Factorizations keep the `nalgebra::Cholesky` object alive, so each cache
/// slot holds backend memory until it is released.
#[derive(Debug, Default, Clone, Copy)]
pub struct NalgebraBackend;

impl DenseBackend for NalgebraBackend {
    type Factor = Cholesky<f64, Dyn>;

    fn kind(&self) -> BackendKind {
        BackendKind::Nalgebra
    }

    fn add(&self, a: MatView<'_>, mut b: MatViewMut<'_>, alpha: f64) -> Result<(), BackendError> {
        if a.shape() != b.shape() {
            return Err(BackendError::DimensionMismatch { what: "add", expected: b.shape(), actual: a.shape() });
        }
        let (nrows, ncols) = a.shape();
        let av = DMatrixView::from_slice(a.as_slice(), nrows, ncols);
        let mut bv = DMatrixViewMut::from_slice(b.as_mut_slice(), nrows, ncols);
        bv.zip_apply(&av, |bi, ai| *bi += alpha * ai);
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
        let (m, k) = if trans_a { (a.ncols(), a.nrows()) } else { a.shape() };
        let (kb, n) = if trans_b { (b.ncols(), b.nrows()) } else { b.shape() };
        if k != kb || (m, n) != c.shape() {
            return Err(BackendError::DimensionMismatch { what: "gemm", expected: c.shape(), actual: (m, n) });
        }
        let av = DMatrixView::from_slice(a.as_slice(), a.nrows(), a.ncols());
        let bv = DMatrixView::from_slice(b.as_slice(), b.nrows(), b.ncols());
        let mut cv = DMatrixViewMut::from_slice(c.as_mut_slice(), m, n);
        match (trans_a, trans_b) {
            (false, false) => cv.gemm(alpha, &av, &bv, beta),
            (true, false) => cv.gemm_tr(alpha, &av, &bv, beta),
            (false, true) => cv.gemm(alpha, &av, &bv.transpose(), beta),
            (true, true) => cv.gemm_tr(alpha, &av, &bv.transpose(), beta),
        }
        Ok(())
    }

    fn symm(&self, a: MatView<'_>, b: MatView<'_>, mut c: MatViewMut<'_>, alpha: f64, beta: f64) -> Result<(), BackendError> {
        if !a.is_square() {
            return Err(BackendError::NotSquare(a.shape()));
        }
        if a.ncols() != b.nrows() || b.shape() != c.shape() {
            return Err(BackendError::DimensionMismatch { what: "symm", expected: c.shape(), actual: b.shape() });
        }
        let mut full = DMatrix::from_column_slice(a.nrows(), a.ncols(), a.as_slice());
        full.fill_upper_triangle_with_lower_triangle();
        let bv = DMatrixView::from_slice(b.as_slice(), b.nrows(), b.ncols());
        let (nrows, ncols) = c.shape();
        let mut cv = DMatrixViewMut::from_slice(c.as_mut_slice(), nrows, ncols);
        cv.gemm(alpha, &full, &bv, beta);
        Ok(())
    }

    fn cholesky_factor(&self, mut a: MatViewMut<'_>) -> Result<Self::Factor, BackendError> {
        let (n, ncols) = a.shape();
        if n != ncols {
            return Err(BackendError::NotSquare((n, ncols)));
        }
        let owned = DMatrix::from_column_slice(n, n, a.as_slice());
        let chol = match Cholesky::new(owned) {
            Some(chol) => chol,
            None => {
                // nalgebra does not report the failing pivot; recover it from
                // the reference kernel on a scratch copy.
                let mut scratch = a.as_slice().to_vec();
                let column = match kernels::cholesky_lower(MatViewMut::from_slice(&mut scratch, n, n)) {
                    Err(BackendError::NotPositiveDefinite { column }) => column,
                    _ => n.saturating_sub(1),
                };
                return Err(BackendError::NotPositiveDefinite { column });
            }
        };
        let l = chol.l_dirty();
        for j in 0..n {
            for i in j..n {
                a.set(i, j, l[(i, j)]);
            }
        }
        Ok(chol)
    }

    fn cholesky_solve(&self, l: MatView<'_>, factor: &Self::Factor, mut b: MatViewMut<'_>) -> Result<(), BackendError> {
        let n = factor.l_dirty().nrows();
        if l.nrows() != n || b.nrows() != n {
            return Err(BackendError::DimensionMismatch { what: "cholesky solve", expected: (n, b.ncols()), actual: b.shape() });
        }
        let (nrows, ncols) = b.shape();
        let mut bv = DMatrixViewMut::from_slice(b.as_mut_slice(), nrows, ncols);
        factor.solve_mut(&mut bv);
        Ok(())
    }

    fn owns_factor_memory(&self) -> bool {
        true
    }
}
