//! Column-major dense matrix views.
//!
//! Every block the solver touches lives inside one of a few large buffers, so
//! the kernels work on borrowed views rather than owned matrices. A view is a
//! slice of exactly `nrows * ncols` values stored column by column.

use std::fmt;

/// Immutable column-major view into a dense block.
#[derive(Clone, Copy)]
pub struct MatView<'a> {
    data: &'a [f64],
    nrows: usize,
    ncols: usize,
}

/// Mutable column-major view into a dense block.
pub struct MatViewMut<'a> {
    data: &'a mut [f64],
    nrows: usize,
    ncols: usize,
}

impl<'a> MatView<'a> {
    /// Wrap `data` as an `nrows x ncols` matrix.
    pub fn from_slice(data: &'a [f64], nrows: usize, ncols: usize) -> Self {
        debug_assert_eq!(data.len(), nrows * ncols, "view size mismatch");
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.nrows + i]
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// Largest absolute entry.
    pub fn norm_inf(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

impl<'a> MatViewMut<'a> {
    /// Wrap `data` as a mutable `nrows x ncols` matrix.
    pub fn from_slice(data: &'a mut [f64], nrows: usize, ncols: usize) -> Self {
        debug_assert_eq!(data.len(), nrows * ncols, "view size mismatch");
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.nrows + i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[j * self.nrows + i] = value;
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn as_slice(&self) -> &[f64] {
        &*self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut *self.data
    }

    /// Reborrow as an immutable view.
    pub fn rb(&self) -> MatView<'_> {
        MatView {
            data: &*self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Reborrow as a shorter-lived mutable view.
    pub fn rb_mut(&mut self) -> MatViewMut<'_> {
        MatViewMut {
            data: &mut *self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn scale(&mut self, alpha: f64) {
        for v in self.data.iter_mut() {
            *v *= alpha;
        }
    }

    /// Copy every entry of `src`, which must have the same shape.
    pub fn copy_from(&mut self, src: MatView<'_>) {
        debug_assert_eq!(self.shape(), src.shape());
        self.data.copy_from_slice(src.data);
    }

    /// Swap contents with another view of the same shape.
    pub fn swap_with(&mut self, other: &mut MatViewMut<'_>) {
        debug_assert_eq!(self.shape(), other.shape());
        self.data.swap_with_slice(&mut *other.data);
    }

    /// Overwrite with `alpha * I`. The block must be square.
    pub fn set_scaled_identity(&mut self, alpha: f64) {
        self.fill(0.0);
        for i in 0..self.nrows.min(self.ncols) {
            self.set(i, i, alpha);
        }
    }

    /// Overwrite with a diagonal matrix.
    pub fn set_diagonal(&mut self, diag: &[f64]) {
        debug_assert_eq!(diag.len(), self.nrows.min(self.ncols));
        self.fill(0.0);
        for (i, &d) in diag.iter().enumerate() {
            self.set(i, i, d);
        }
    }
}

impl fmt::Debug for MatView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_matrix(f, self.data, self.nrows, self.ncols)
    }
}

impl fmt::Debug for MatViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_matrix(f, &*self.data, self.nrows, self.ncols)
    }
}

fn write_matrix(f: &mut fmt::Formatter<'_>, data: &[f64], nrows: usize, ncols: usize) -> fmt::Result {
    writeln!(f, "{}x{} matrix:", nrows, ncols)?;
    for i in 0..nrows {
        for j in 0..ncols {
            write!(f, "{:10.4} ", data[j * nrows + i])?;
        }
        writeln!(f)?;
    }
    Ok(())
}
