//! Cache of Cholesky factorizations.
//!
//! Slots `2k` and `2k + 1` hold the factors of the diagonal cost blocks `Q_k`
//! and `R_k`. They are followed by one slot per separator, grouped by level:
//! level `l` owns `2^(depth - l - 1)` consecutive slots.

use crate::error::{NdlqrError, NdlqrResult};
use crate::linalg::{BackendError, BackendKind, DenseBackend, MatView, MatViewMut};
use std::fmt;

/// Names the block a cache slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CholeskyBlock {
    Q(usize),
    R(usize),
    Separator { leaf: usize, level: usize },
}

impl fmt::Display for CholeskyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CholeskyBlock::Q(k) => write!(f, "Q[{}]", k),
            CholeskyBlock::R(k) => write!(f, "R[{}]", k),
            CholeskyBlock::Separator { leaf, level } => write!(f, "S[leaf {}, level {}]", leaf, level),
        }
    }
}

/// One cache slot.
#[derive(Debug)]
pub struct CholeskyInfo<F> {
    factor: Option<F>,
    success: bool,
    backend: Option<BackendKind>,
    is_freed: bool,
}

impl<F> Default for CholeskyInfo<F> {
    fn default() -> Self {
        Self { factor: None, success: true, backend: None, is_freed: true }
    }
}

impl<F> CholeskyInfo<F> {
    /// False after a failed factorization.
    pub fn success(&self) -> bool {
        self.success
    }

    /// True when the slot holds no backend-owned memory.
    pub fn is_freed(&self) -> bool {
        self.is_freed
    }

    /// Backend of the most recent factorization.
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    pub fn factor(&self) -> Option<&F> {
        self.factor.as_ref()
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }

    /// Factor `a` in place, releasing whatever the slot held before.
    pub fn factorize<B>(&mut self, backend: &B, a: MatViewMut<'_>) -> Result<(), BackendError>
    where
        B: DenseBackend<Factor = F>,
    {
        self.release(backend);
        self.backend = Some(backend.kind());
        match backend.cholesky_factor(a) {
            Ok(factor) => {
                self.factor = Some(factor);
                self.success = true;
                self.is_freed = !backend.owns_factor_memory();
                Ok(())
            }
            Err(e) => {
                self.success = false;
                Err(e)
            }
        }
    }

    /// Solve against the cached factor; `l` is the factored block.
    pub fn solve<B>(&self, backend: &B, l: MatView<'_>, b: MatViewMut<'_>) -> Result<(), BackendError>
    where
        B: DenseBackend<Factor = F>,
    {
        let factor = self.factor.as_ref().ok_or(BackendError::MissingFactor)?;
        backend.cholesky_solve(l, factor, b)
    }

    pub fn release<B>(&mut self, backend: &B)
    where
        B: DenseBackend<Factor = F>,
    {
        if let Some(factor) = self.factor.take() {
            backend.release(factor);
        }
        self.is_freed = true;
    }
}

#[derive(Debug)]
pub struct CholeskyFactors<F> {
    depth: usize,
    nhorizon: usize,
    slots: Vec<CholeskyInfo<F>>,
}

impl<F> CholeskyFactors<F> {
    pub fn new(depth: usize, nhorizon: usize) -> NdlqrResult<Self> {
        if nhorizon < 2 || !nhorizon.is_power_of_two() {
            return Err(NdlqrError::InvalidHorizon(nhorizon));
        }
        if depth == 0 || depth > nhorizon.trailing_zeros() as usize {
            return Err(NdlqrError::InvalidDimensions(format!(
                "depth {} does not fit horizon {}",
                depth, nhorizon
            )));
        }
        let numfacts = 2 * nhorizon + Self::separator_count(depth);
        let slots = (0..numfacts).map(|_| CholeskyInfo::default()).collect();
        Ok(Self { depth, nhorizon, slots })
    }

    fn separator_count(depth: usize) -> usize {
        (0..depth).map(|level| 1usize << (depth - level - 1)).sum()
    }

    /// Number of separators at `level`.
    pub fn leaves_at_level(&self, level: usize) -> usize {
        1usize << (self.depth - level - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn slots(&self) -> &[CholeskyInfo<F>] {
        &self.slots
    }

    pub fn q_slot(&self, index: usize) -> NdlqrResult<usize> {
        if index >= self.nhorizon {
            return Err(NdlqrError::IndexOutOfRange { index, max: self.nhorizon - 1 });
        }
        Ok(2 * index)
    }

    pub fn r_slot(&self, index: usize) -> NdlqrResult<usize> {
        if index + 1 >= self.nhorizon {
            return Err(NdlqrError::IndexOutOfRange { index, max: self.nhorizon - 2 });
        }
        Ok(2 * index + 1)
    }

    pub fn separator_slot(&self, leaf: usize, level: usize) -> NdlqrResult<usize> {
        if level >= self.depth {
            return Err(NdlqrError::LevelOutOfRange { level, depth: self.depth });
        }
        let count = self.leaves_at_level(level);
        if leaf >= count {
            return Err(NdlqrError::LeafOutOfRange { leaf, level, count });
        }
        Ok(self.level_start(level) + leaf)
    }

    fn level_start(&self, level: usize) -> usize {
        let shallower: usize = (0..level).map(|lvl| 1usize << (self.depth - lvl - 1)).sum();
        2 * self.nhorizon + shallower
    }

    pub fn q_factor(&self, index: usize) -> NdlqrResult<&CholeskyInfo<F>> {
        let slot = self.q_slot(index)?;
        Ok(&self.slots[slot])
    }

    pub fn r_factor(&self, index: usize) -> NdlqrResult<&CholeskyInfo<F>> {
        let slot = self.r_slot(index)?;
        Ok(&self.slots[slot])
    }

    pub fn separator_factor(&self, leaf: usize, level: usize) -> NdlqrResult<&CholeskyInfo<F>> {
        let slot = self.separator_slot(leaf, level)?;
        Ok(&self.slots[slot])
    }

    pub fn q_factor_mut(&mut self, index: usize) -> NdlqrResult<&mut CholeskyInfo<F>> {
        let slot = self.q_slot(index)?;
        Ok(&mut self.slots[slot])
    }

    pub fn r_factor_mut(&mut self, index: usize) -> NdlqrResult<&mut CholeskyInfo<F>> {
        let slot = self.r_slot(index)?;
        Ok(&mut self.slots[slot])
    }

    pub fn separator_factor_mut(&mut self, leaf: usize, level: usize) -> NdlqrResult<&mut CholeskyInfo<F>> {
        let slot = self.separator_slot(leaf, level)?;
        Ok(&mut self.slots[slot])
    }

    /// The `[Q_0, R_0, Q_1, R_1, ...]` slots.
    pub(crate) fn leaf_slots_mut(&mut self) -> &mut [CholeskyInfo<F>] {
        let end = 2 * self.nhorizon;
        &mut self.slots[..end]
    }

    /// The separator slots of one level, ordered by leaf.
    pub(crate) fn level_slots_mut(&mut self, level: usize) -> NdlqrResult<&mut [CholeskyInfo<F>]> {
        if level >= self.depth {
            return Err(NdlqrError::LevelOutOfRange { level, depth: self.depth });
        }
        let start = self.level_start(level);
        let count = self.leaves_at_level(level);
        Ok(&mut self.slots[start..start + count])
    }

    /// Release every live factorization.
    pub fn release_all<B>(&mut self, backend: &B)
    where
        B: DenseBackend<Factor = F>,
    {
        for slot in self.slots.iter_mut() {
            slot.release(backend);
        }
    }

    /// Number of slots currently holding backend memory.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_freed).count()
    }
}
