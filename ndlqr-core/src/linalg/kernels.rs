//! Hand-written dense kernels.
//!
//! These are straightforward triple loops over column-major views. They are
//! the numerical reference for the other backends and are fast enough for the
//! small blocks (tens of rows) that appear in LQR problems.

use super::backend::BackendError;
use super::dense::{MatView, MatViewMut};

fn check_shape(what: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Result<(), BackendError> {
    if expected != actual {
        return Err(BackendError::DimensionMismatch { what, expected, actual });
    }
    Ok(())
}

#[inline]
fn op(m: &MatView<'_>, trans: bool, i: usize, j: usize) -> f64 {
    if trans {
        m.get(j, i)
    } else {
        m.get(i, j)
    }
}

/// `b += alpha * a`
pub fn add(a: MatView<'_>, mut b: MatViewMut<'_>, alpha: f64) -> Result<(), BackendError> {
    check_shape("add", b.shape(), a.shape())?;
    for (bi, ai) in b.as_mut_slice().iter_mut().zip(a.as_slice()) {
        *bi += alpha * ai;
    }
    Ok(())
}

/// `C = alpha * op(A) * op(B) + beta * C`
///
/// When `beta == 0` the previous contents of `C` are never read.
pub fn gemm(
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
    check_shape("gemm inner", (k, k), (k, kb))?;
    check_shape("gemm output", (m, n), c.shape())?;

    for j in 0..n {
        for i in 0..m {
            let mut acc = 0.0;
            for p in 0..k {
                acc += op(&a, trans_a, i, p) * op(&b, trans_b, p, j);
            }
            let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
            c.set(i, j, prev + alpha * acc);
        }
    }
    Ok(())
}

/// `C = alpha * A * B + beta * C` with `A` symmetric; only the lower triangle
/// of `A` is read.
pub fn symm(a: MatView<'_>, b: MatView<'_>, mut c: MatViewMut<'_>, alpha: f64, beta: f64) -> Result<(), BackendError> {
    if !a.is_square() {
        return Err(BackendError::NotSquare(a.shape()));
    }
    let m = a.nrows();
    check_shape("symm inner", (m, b.ncols()), b.shape())?;
    check_shape("symm output", b.shape(), c.shape())?;

    for j in 0..b.ncols() {
        for i in 0..m {
            let mut acc = 0.0;
            for p in 0..m {
                let aip = if i >= p { a.get(i, p) } else { a.get(p, i) };
                acc += aip * b.get(p, j);
            }
            let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
            c.set(i, j, prev + alpha * acc);
        }
    }
    Ok(())
}

/// In-place lower Cholesky factorization. The strictly upper triangle is left
/// untouched.
pub fn cholesky_lower(mut a: MatViewMut<'_>) -> Result<(), BackendError> {
    let (n, ncols) = a.shape();
    if n != ncols {
        return Err(BackendError::NotSquare((n, ncols)));
    }
    for j in 0..n {
        for p in 0..j {
            let ljp = a.get(j, p);
            if ljp == 0.0 {
                continue;
            }
            for i in j..n {
                let v = a.get(i, j) - a.get(i, p) * ljp;
                a.set(i, j, v);
            }
        }
        let pivot = a.get(j, j);
        if pivot <= 0.0 || !pivot.is_finite() {
            return Err(BackendError::NotPositiveDefinite { column: j });
        }
        let d = pivot.sqrt();
        for i in j..n {
            let v = a.get(i, j) / d;
            a.set(i, j, v);
        }
    }
    Ok(())
}

/// Solve `L L^T X = B` in place given the lower factor `L`.
pub fn cholesky_solve_lower(l: MatView<'_>, mut b: MatViewMut<'_>) -> Result<(), BackendError> {
    if !l.is_square() {
        return Err(BackendError::NotSquare(l.shape()));
    }
    let n = l.nrows();
    check_shape("cholesky solve", (n, b.ncols()), b.shape())?;

    for col in 0..b.ncols() {
        // L y = b
        for j in 0..n {
            let yj = b.get(j, col) / l.get(j, j);
            b.set(j, col, yj);
            for i in (j + 1)..n {
                let v = b.get(i, col) - l.get(i, j) * yj;
                b.set(i, col, v);
            }
        }
        // L^T x = y
        for j in (0..n).rev() {
            let mut xj = b.get(j, col);
            for i in (j + 1)..n {
                xj -= l.get(i, j) * b.get(i, col);
            }
            b.set(j, col, xj / l.get(j, j));
        }
    }
    Ok(())
}
