//! The nested-dissection recursion.
//!
//! The KKT system is eliminated bottom-up over the levels of the
//! [`OrderedBinaryTree`]. Each level runs four phases:
//!
//! 1. inner products `S = C1' F1 + C2' F2` into each separator's dual block,
//! 2. Cholesky factorization of `S` (factor pass only, cached),
//! 3. back-substitution against `S` for every ancestor level,
//! 4. the Schur-complement update of every knot routed through the separator.
//!
//! The factor pass writes into `fact` for every level above the one being
//! eliminated. The solve pass repeats the recursion on the width-1 `soln`
//! container, reusing the cached factors. Before either pass the leaf phase
//! eliminates the diagonal cost blocks of every knot.
//!
//! Every phase is split into contiguous ranges of work items, one per worker
//! (see [`work_range`]). Within a phase the items write disjoint blocks and
//! never read a block another item writes, so workers share the containers
//! without locking and the end of each phase is the only synchronization.

use crate::cholesky_factors::{CholeskyBlock, CholeskyFactors, CholeskyInfo};
use crate::error::{NdlqrError, NdlqrResult};
use crate::linalg::{BackendError, DenseBackend, MatViewMut};
use crate::nddata::{Block, NdData, SharedNdData};
use crate::tree::OrderedBinaryTree;
use rayon::prelude::*;
use std::ops::Range;

/// Container a phase writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Width-`n` factorization (factor pass).
    Fact,
    /// Width-1 right-hand side / solution (solve pass).
    Soln,
}

/// Half-open range of work items handled by worker `t` of `nt`.
///
/// Every worker gets `total / nt` items; the last one also takes the remainder.
pub fn work_range(total: usize, nt: usize, t: usize) -> Range<usize> {
    let nt = nt.max(1);
    let chunk = total / nt;
    let start = t * chunk;
    let stop = if t + 1 == nt { total } else { (t + 1) * chunk };
    start..stop
}

/// Split `items` (`total` groups of `stride` values) into the per-worker
/// pieces of [`work_range`].
fn split_work<T>(mut items: &mut [T], stride: usize, total: usize, nt: usize) -> Vec<(Range<usize>, &mut [T])> {
    debug_assert_eq!(items.len(), stride * total);
    let nt = nt.max(1);
    let mut pieces = Vec::with_capacity(nt);
    for t in 0..nt {
        let range = work_range(total, nt, t);
        let (head, tail) = std::mem::take(&mut items).split_at_mut(range.len() * stride);
        items = tail;
        pieces.push((range, head));
    }
    pieces
}

fn not_pd(block: CholeskyBlock) -> impl FnOnce(BackendError) -> NdlqrError {
    move |source| {
        log::warn!("factorization of {} failed: {}", block, source);
        NdlqrError::NotPositiveDefinite { block, source }
    }
}

/// Everything the phases share: read-only problem data plus the two
/// containers they write.
pub(crate) struct NdWorkspace<'a, B> {
    pub backend: &'a B,
    pub tree: &'a OrderedBinaryTree,
    pub data: &'a NdData,
    pub fact: SharedNdData<'a>,
    pub soln: SharedNdData<'a>,
}

impl<'a, B: DenseBackend> NdWorkspace<'a, B> {
    fn target(&self, target: Target) -> &SharedNdData<'a> {
        match target {
            Target::Fact => &self.fact,
            Target::Soln => &self.soln,
        }
    }

    fn nhorizon(&self) -> usize {
        self.tree.num_elements()
    }

    /// Mark a phase boundary for the debug access checks.
    pub(crate) fn begin_phase(&self) {
        self.fact.begin_phase();
        self.soln.begin_phase();
    }

    fn depth(&self) -> usize {
        self.tree.depth()
    }

    fn level_of(&self, index: usize) -> NdlqrResult<usize> {
        self.tree
            .index_level(index)
            .ok_or(NdlqrError::IndexOutOfRange { index, max: self.nhorizon() - 2 })
    }

    fn separator_at(&self, index: usize, level: usize) -> NdlqrResult<usize> {
        self.tree.index_at_level(index, level).ok_or(NdlqrError::LevelOutOfRange { level, depth: self.depth() })
    }

    /// Levels of `target` written while eliminating `level`.
    fn update_levels(&self, target: Target, level: usize) -> Range<usize> {
        match target {
            Target::Fact => level + 1..self.depth(),
            Target::Soln => 0..1,
        }
    }

    /// Levels of `target` the inner products accumulate into.
    fn product_levels(&self, target: Target, level: usize) -> Range<usize> {
        match target {
            Target::Fact => level..self.depth(),
            Target::Soln => 0..1,
        }
    }

    /// Eliminate the diagonal cost blocks of knot `index`.
    ///
    /// `q` and `r` hold the dense `Q_k` and `R_k` blocks and are overwritten
    /// by their factors.
    ///
    /// # Safety
    ///
    /// No other thread may access the `fact` or `soln` blocks of knot `index`.
    pub(crate) unsafe fn solve_leaf(
        &self,
        index: usize,
        mut q: MatViewMut<'_>,
        mut r: MatViewMut<'_>,
        q_info: &mut CholeskyInfo<B::Factor>,
        r_info: &mut CholeskyInfo<B::Factor>,
    ) -> NdlqrResult<()> {
        let backend = self.backend;
        let nhorizon = self.nhorizon();

        let item = (index, 0);

        if index == 0 {
            // SAFETY: knot 0 is owned by the caller.
            let (mut f_lambda, mut f_state, mut f_input, mut z_lambda, mut z_state, mut z_input) = unsafe {
                (
                    self.fact.block_mut(0, 0, Block::Lambda, item)?,
                    self.fact.block_mut(0, 0, Block::State, item)?,
                    self.fact.block_mut(0, 0, Block::Input, item)?,
                    self.soln.block_mut(0, 0, Block::Lambda, item)?,
                    self.soln.block_mut(0, 0, Block::State, item)?,
                    self.soln.block_mut(0, 0, Block::Input, item)?,
                )
            };
            let c = self.data.factor(0, 0)?;

            f_lambda.fill(0.0);
            backend.add(c.state, f_lambda.rb_mut(), -1.0)?;
            f_state.fill(0.0);
            f_input.copy_from(c.input);

            r_info.factorize(backend, r.rb_mut()).map_err(not_pd(CholeskyBlock::R(0)))?;
            r_info.solve(backend, r.rb(), f_input.rb_mut())?;
            r_info.solve(backend, r.rb(), z_input.rb_mut())?;

            // x_0 is known; the first dual row is what remains unknown
            z_lambda.swap_with(&mut z_state);
            backend.symm(q.rb(), z_state.rb(), z_lambda.rb_mut(), -1.0, -1.0)?;
            z_state.scale(-1.0);

            q_info.factorize(backend, q.rb_mut()).map_err(not_pd(CholeskyBlock::Q(0)))?;
            return Ok(());
        }

        q_info.factorize(backend, q.rb_mut()).map_err(not_pd(CholeskyBlock::Q(index)))?;

        if index + 1 < nhorizon {
            let level = self.level_of(index)?;
            r_info.factorize(backend, r.rb_mut()).map_err(not_pd(CholeskyBlock::R(index)))?;

            // SAFETY: knot `index` is owned by the caller.
            let (mut z_input, mut f_state, mut f_input) = unsafe {
                (
                    self.soln.block_mut(index, 0, Block::Input, item)?,
                    self.fact.block_mut(index, level, Block::State, item)?,
                    self.fact.block_mut(index, level, Block::Input, item)?,
                )
            };
            r_info.solve(backend, r.rb(), z_input.rb_mut())?;

            let c = self.data.factor(index, level)?;
            f_state.copy_from(c.state);
            q_info.solve(backend, q.rb(), f_state.rb_mut())?;
            f_input.copy_from(c.input);
            r_info.solve(backend, r.rb(), f_input.rb_mut())?;
        }

        // SAFETY: as above.
        let mut z_state = unsafe { self.soln.block_mut(index, 0, Block::State, item)? };
        q_info.solve(backend, q.rb(), z_state.rb_mut())?;

        // coupling to the previous knot through -I
        let prev_level = self.level_of(index - 1)?;
        let c = self.data.factor(index, prev_level)?;
        // SAFETY: as above.
        let (mut f_state, mut f_input) = unsafe {
            (
                self.fact.block_mut(index, prev_level, Block::State, item)?,
                self.fact.block_mut(index, prev_level, Block::Input, item)?,
            )
        };
        f_state.copy_from(c.state);
        q_info.solve(backend, q.rb(), f_state.rb_mut())?;
        f_input.fill(0.0);
        Ok(())
    }

    /// `S = C1' F1 + C2' F2 - S` into the dual block of knot `index + 1`.
    ///
    /// `C` comes from `data` at `data_level`, `F` and `S` from `target` at
    /// `fact_level`.
    ///
    /// # Safety
    ///
    /// The dual block of `(index + 1, fact_level)` in `target` must not be
    /// accessed by any other thread, and its state and input blocks at
    /// `index` and `index + 1` must not be written concurrently.
    pub(crate) unsafe fn factor_inner_product(
        &self,
        target: Target,
        index: usize,
        data_level: usize,
        fact_level: usize,
    ) -> NdlqrResult<()> {
        let backend = self.backend;
        let t = self.target(target);
        let c1 = self.data.factor(index, data_level)?;
        let c2 = self.data.factor(index + 1, data_level)?;
        let item = (index, fact_level);
        // SAFETY: delegated to the caller.
        let (f1x, f1u, f2x, f2u, mut s) = unsafe {
            (
                t.block(index, fact_level, Block::State, item)?,
                t.block(index, fact_level, Block::Input, item)?,
                t.block(index + 1, fact_level, Block::State, item)?,
                t.block(index + 1, fact_level, Block::Input, item)?,
                t.block_mut(index + 1, fact_level, Block::Lambda, item)?,
            )
        };
        backend.gemm(c1.state, f1x, s.rb_mut(), true, false, 1.0, -1.0)?;
        backend.gemm(c1.input, f1u, s.rb_mut(), true, false, 1.0, 1.0)?;
        backend.gemm(c2.state, f2x, s.rb_mut(), true, false, 1.0, 1.0)?;
        backend.gemm(c2.input, f2u, s.rb_mut(), true, false, 1.0, 1.0)?;
        Ok(())
    }

    /// Factor the Schur complement of separator `(leaf, level)` in place.
    ///
    /// # Safety
    ///
    /// The separator's dual block in `fact` must not be accessed by any other
    /// thread.
    pub(crate) unsafe fn factor_separator(
        &self,
        info: &mut CholeskyInfo<B::Factor>,
        leaf: usize,
        level: usize,
    ) -> NdlqrResult<()> {
        let index = OrderedBinaryTree::index_from_leaf(leaf, level);
        // SAFETY: delegated to the caller.
        let s = unsafe { self.fact.block_mut(index + 1, level, Block::Lambda, (index, level))? };
        info.factorize(self.backend, s).map_err(not_pd(CholeskyBlock::Separator { leaf, level }))?;
        Ok(())
    }

    /// Solve the dual block of `(index + 1, upper_level)` in `target` against
    /// the cached factor of the separator at `level`.
    ///
    /// # Safety
    ///
    /// The target block must not be accessed by any other thread, and the
    /// factored block must not be written concurrently.
    pub(crate) unsafe fn solve_cholesky_factor(
        &self,
        info: &CholeskyInfo<B::Factor>,
        target: Target,
        index: usize,
        level: usize,
        upper_level: usize,
    ) -> NdlqrResult<()> {
        if target == Target::Fact && upper_level <= level {
            return Err(NdlqrError::InvalidDimensions(format!(
                "back-substitution level {} must lie above separator level {}",
                upper_level, level
            )));
        }
        let item = (index, upper_level);
        // SAFETY: distinct blocks (checked above); exclusivity delegated to
        // the caller.
        let (l, b) = unsafe {
            (
                self.fact.block(index + 1, level, Block::Lambda, item)?,
                self.target(target).block_mut(index + 1, upper_level, Block::Lambda, item)?,
            )
        };
        info.solve(self.backend, l, b)?;
        Ok(())
    }

    /// Subtract the contribution of separator `index` from knot `i`:
    /// `g -= F f` with `F = fact(i, level)`, `f = target(index + 1).λ` and
    /// `g = target(i)`, all at `upper_level` in `target`. The dual block of
    /// `g` is only touched when `calc_lambda` is set.
    ///
    /// # Safety
    ///
    /// The written blocks of knot `i` must not be accessed by any other
    /// thread, and the read blocks must not be written concurrently.
    pub(crate) unsafe fn update_shur_factor(
        &self,
        target: Target,
        index: usize,
        i: usize,
        level: usize,
        upper_level: usize,
        calc_lambda: bool,
    ) -> NdlqrResult<()> {
        let backend = self.backend;
        let t = self.target(target);
        debug_assert!(!(calc_lambda && i == index + 1), "update would alias its own separator");
        let item = (i, upper_level);
        // SAFETY: delegated to the caller.
        let f = unsafe { t.block(index + 1, upper_level, Block::Lambda, item)? };
        let blocks: &[Block] = if calc_lambda {
            &[Block::Lambda, Block::State, Block::Input]
        } else {
            &[Block::State, Block::Input]
        };
        for &block in blocks {
            // SAFETY: as above.
            let (fi, g) = unsafe { (self.fact.block(i, level, block, item)?, t.block_mut(i, upper_level, block, item)?) };
            backend.gemm(fi, f, g, false, false, -1.0, 1.0)?;
        }
        Ok(())
    }

    // Phase drivers. Each call is one phase; returning from it is the barrier.

    /// Leaf phase. `diagonals` holds `Q_k` then `R_k` for every knot.
    pub(crate) fn solve_leaves(
        &self,
        diagonals: &mut [f64],
        leaf_slots: &mut [CholeskyInfo<B::Factor>],
        nt: usize,
    ) -> NdlqrResult<()> {
        let (n, m) = (self.data.nstates(), self.data.ninputs());
        let stride = n * n + m * m;
        let nhorizon = self.nhorizon();
        let diag_pieces = split_work(diagonals, stride, nhorizon, nt);
        let slot_pieces = split_work(leaf_slots, 2, nhorizon, nt);
        self.begin_phase();
        diag_pieces
            .into_iter()
            .zip(slot_pieces)
            .collect::<Vec<_>>()
            .into_par_iter()
            .try_for_each(|((range, diag), (_, slots))| {
                for ((k, diag), slots) in range.zip(diag.chunks_mut(stride)).zip(slots.chunks_mut(2)) {
                    let (q, r) = diag.split_at_mut(n * n);
                    let (q_info, r_info) = slots.split_at_mut(1);
                    // SAFETY: each knot is handled by exactly one item.
                    unsafe {
                        self.solve_leaf(
                            k,
                            MatViewMut::from_slice(q, n, n),
                            MatViewMut::from_slice(r, m, m),
                            &mut q_info[0],
                            &mut r_info[0],
                        )?;
                    }
                }
                Ok(())
            })
    }

    pub(crate) fn inner_products(&self, target: Target, level: usize, nt: usize) -> NdlqrResult<()> {
        let levels = self.product_levels(target, level);
        let span = levels.len();
        let total = self.tree.leaves_at_level(level) * span;
        self.begin_phase();
        (0..nt).into_par_iter().try_for_each(|t| {
            for i in work_range(total, nt, t) {
                let leaf = i / span;
                let fact_level = levels.start + i % span;
                let index = OrderedBinaryTree::index_from_leaf(leaf, level);
                // SAFETY: each item writes the dual block of its own
                // (separator, level) pair and reads only state/input blocks.
                unsafe { self.factor_inner_product(target, index, level, fact_level)? };
            }
            Ok(())
        })
    }

    pub(crate) fn factor_separators(
        &self,
        level_slots: &mut [CholeskyInfo<B::Factor>],
        level: usize,
        nt: usize,
    ) -> NdlqrResult<()> {
        let total = level_slots.len();
        self.begin_phase();
        split_work(level_slots, 1, total, nt)
            .into_par_iter()
            .try_for_each(|(range, slots)| {
                for (leaf, info) in range.zip(slots.iter_mut()) {
                    // SAFETY: one separator per item.
                    unsafe { self.factor_separator(info, leaf, level)? };
                }
                Ok(())
            })
    }

    pub(crate) fn solve_separators(
        &self,
        cache: &CholeskyFactors<B::Factor>,
        target: Target,
        level: usize,
        nt: usize,
    ) -> NdlqrResult<()> {
        let levels = self.update_levels(target, level);
        let span = levels.len();
        if span == 0 {
            return Ok(());
        }
        let total = self.tree.leaves_at_level(level) * span;
        self.begin_phase();
        (0..nt).into_par_iter().try_for_each(|t| {
            for i in work_range(total, nt, t) {
                let leaf = i / span;
                let upper_level = levels.start + i % span;
                let index = OrderedBinaryTree::index_from_leaf(leaf, level);
                let info = cache.separator_factor(leaf, level)?;
                // SAFETY: each item writes its own (separator, upper level)
                // dual block; the factored blocks are only read.
                unsafe { self.solve_cholesky_factor(info, target, index, level, upper_level)? };
            }
            Ok(())
        })
    }

    pub(crate) fn update_shur(&self, target: Target, level: usize, nt: usize) -> NdlqrResult<()> {
        let levels = self.update_levels(target, level);
        let span = levels.len();
        if span == 0 {
            return Ok(());
        }
        let total = self.nhorizon() * span;
        self.begin_phase();
        (0..nt).into_par_iter().try_for_each(|t| {
            for i in work_range(total, nt, t) {
                let k = i / span;
                let upper_level = levels.start + i % span;
                let index = self.separator_at(k, level)?;
                let calc_lambda = self.tree.should_calc_lambda(index, k);
                // SAFETY: each item writes the blocks of its own (knot, upper
                // level) pair. The separator dual blocks it reads are never
                // written in this phase since their knots skip the dual update.
                unsafe { self.update_shur_factor(target, index, k, level, upper_level, calc_lambda)? };
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_range_covers_everything() {
        for total in [0, 1, 7, 8, 33, 100] {
            for nt in 1..=9 {
                let mut next = 0;
                for t in 0..nt {
                    let r = work_range(total, nt, t);
                    assert_eq!(r.start, next, "total={} nt={} t={}", total, nt, t);
                    next = r.end;
                }
                assert_eq!(next, total);
            }
        }
        assert_eq!(work_range(10, 3, 0), 0..3);
        assert_eq!(work_range(10, 3, 2), 6..10);
        assert_eq!(work_range(2, 4, 1), 0..0);
        assert_eq!(work_range(2, 4, 3), 0..2);
    }

    #[test]
    fn test_split_work_matches_ranges() {
        let mut items: Vec<usize> = (0..20).collect();
        let pieces = split_work(&mut items, 2, 10, 3);
        assert_eq!(pieces.len(), 3);
        for (range, piece) in pieces {
            assert_eq!(piece.len(), 2 * range.len());
            if let Some(&first) = piece.first() {
                assert_eq!(first, 2 * range.start);
            }
        }
    }
}
