//! Block storage for the KKT data, its factorization, and the solution.
//!
//! An [`NdData`] owns one contiguous buffer of
//! `nhorizon * depth * (2n + m) * width` values, carved into block triples
//! indexed by `(knot, level)`. Triple `(k, level)` starts at offset
//! `(k + nhorizon * level) * (2n + m) * width` and holds, in order, the dual
//! block (`n x width`), the state block (`n x width`) and the input block
//! (`m x width`).

use crate::error::{NdlqrError, NdlqrResult};
use crate::linalg::{MatView, MatViewMut};
#[cfg(debug_assertions)]
use std::collections::HashMap;
use std::marker::PhantomData;
#[cfg(debug_assertions)]
use std::sync::{Mutex, PoisonError};

/// One of the three blocks of a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    Lambda,
    State,
    Input,
}

/// Shape of a container; shared by [`NdData`] and its parallel views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdLayout {
    pub nstates: usize,
    pub ninputs: usize,
    pub nhorizon: usize,
    pub depth: usize,
    pub width: usize,
}

impl NdLayout {
    /// Values per triple.
    #[inline]
    pub fn factor_size(&self) -> usize {
        (2 * self.nstates + self.ninputs) * self.width
    }

    pub fn len(&self) -> usize {
        self.nhorizon * self.depth * self.factor_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, index: usize, level: usize) -> NdlqrResult<()> {
        if index >= self.nhorizon {
            return Err(NdlqrError::IndexOutOfRange { index, max: self.nhorizon - 1 });
        }
        if level >= self.depth {
            return Err(NdlqrError::LevelOutOfRange { level, depth: self.depth });
        }
        Ok(())
    }

    /// Start of triple `(index, level)`.
    pub fn factor_offset(&self, index: usize, level: usize) -> NdlqrResult<usize> {
        self.check(index, level)?;
        Ok((index + self.nhorizon * level) * self.factor_size())
    }

    /// Offset and row count of one block.
    pub fn block_offset(&self, index: usize, level: usize, block: Block) -> NdlqrResult<(usize, usize)> {
        let base = self.factor_offset(index, level)?;
        let n = self.nstates;
        Ok(match block {
            Block::Lambda => (base, n),
            Block::State => (base + n * self.width, n),
            Block::Input => (base + 2 * n * self.width, self.ninputs),
        })
    }
}

/// Read-only view of a triple.
#[derive(Debug, Clone, Copy)]
pub struct NdFactor<'a> {
    pub lambda: MatView<'a>,
    pub state: MatView<'a>,
    pub input: MatView<'a>,
}

/// Mutable view of a triple.
#[derive(Debug)]
pub struct NdFactorMut<'a> {
    pub lambda: MatViewMut<'a>,
    pub state: MatViewMut<'a>,
    pub input: MatViewMut<'a>,
}

#[derive(Debug, Clone)]
pub struct NdData {
    layout: NdLayout,
    data: Vec<f64>,
}

impl NdData {
    /// Allocate a zeroed container.
    ///
    /// `width == 1` containers hold vectors and only have level 0; wider ones
    /// get one level per tree level.
    pub fn new(nstates: usize, ninputs: usize, nhorizon: usize, width: usize) -> NdlqrResult<Self> {
        if nhorizon < 2 || !nhorizon.is_power_of_two() {
            return Err(NdlqrError::InvalidHorizon(nhorizon));
        }
        if nstates == 0 || ninputs == 0 || width == 0 {
            return Err(NdlqrError::InvalidDimensions(format!(
                "nstates={}, ninputs={}, width={} must all be positive",
                nstates, ninputs, width
            )));
        }
        let depth = if width == 1 { 1 } else { nhorizon.trailing_zeros() as usize };
        let layout = NdLayout { nstates, ninputs, nhorizon, depth, width };
        Ok(Self { layout, data: vec![0.0; layout.len()] })
    }

    pub fn layout(&self) -> NdLayout {
        self.layout
    }

    pub fn nstates(&self) -> usize {
        self.layout.nstates
    }

    pub fn ninputs(&self) -> usize {
        self.layout.ninputs
    }

    pub fn nhorizon(&self) -> usize {
        self.layout.nhorizon
    }

    pub fn depth(&self) -> usize {
        self.layout.depth
    }

    pub fn width(&self) -> usize {
        self.layout.width
    }

    pub fn nsegments(&self) -> usize {
        self.layout.nhorizon - 1
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Zero the whole buffer.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }

    pub fn factor(&self, index: usize, level: usize) -> NdlqrResult<NdFactor<'_>> {
        let start = self.layout.factor_offset(index, level)?;
        let (n, m, w) = (self.layout.nstates, self.layout.ninputs, self.layout.width);
        let triple = &self.data[start..start + self.layout.factor_size()];
        let (lambda, rest) = triple.split_at(n * w);
        let (state, input) = rest.split_at(n * w);
        Ok(NdFactor {
            lambda: MatView::from_slice(lambda, n, w),
            state: MatView::from_slice(state, n, w),
            input: MatView::from_slice(input, m, w),
        })
    }

    pub fn factor_mut(&mut self, index: usize, level: usize) -> NdlqrResult<NdFactorMut<'_>> {
        let start = self.layout.factor_offset(index, level)?;
        let (n, m, w) = (self.layout.nstates, self.layout.ninputs, self.layout.width);
        let size = self.layout.factor_size();
        let triple = &mut self.data[start..start + size];
        let (lambda, rest) = triple.split_at_mut(n * w);
        let (state, input) = rest.split_at_mut(n * w);
        Ok(NdFactorMut {
            lambda: MatViewMut::from_slice(lambda, n, w),
            state: MatViewMut::from_slice(state, n, w),
            input: MatViewMut::from_slice(input, m, w),
        })
    }

    /// Shared view for the parallel phases.
    pub(crate) fn shared(&mut self) -> SharedNdData<'_> {
        SharedNdData {
            ptr: SendPtr(self.data.as_mut_ptr()),
            layout: self.layout,
            #[cfg(debug_assertions)]
            claims: AccessLog::default(),
            _marker: PhantomData,
        }
    }
}

/// Raw base pointer that may cross thread boundaries.
#[derive(Clone, Copy)]
struct SendPtr(*mut f64);

// Safety: the pointer is only dereferenced through `SharedNdData`, whose
// callers guarantee that concurrently accessed blocks are disjoint.
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

/// Work item that accesses a block, named by its `(knot, level)` pair.
pub(crate) type WorkItem = (usize, usize);

/// Blocks claimed during the current phase (debug builds only).
#[cfg(debug_assertions)]
#[derive(Default)]
struct AccessLog {
    claims: Mutex<HashMap<(usize, usize, Block), Claim>>,
}

#[cfg(debug_assertions)]
#[derive(Default)]
struct Claim {
    writer: Option<WorkItem>,
    readers: Vec<WorkItem>,
}

#[cfg(debug_assertions)]
impl AccessLog {
    fn clear(&self) {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Panics if `item` touches a block another item of the phase writes, or
    /// writes a block another item reads.
    fn record(&self, item: WorkItem, key: (usize, usize, Block), write: bool) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        let claim = claims.entry(key).or_default();
        if let Some(writer) = claim.writer {
            assert!(writer == item, "block {:?} written by item {:?} and accessed by item {:?}", key, writer, item);
        }
        if write {
            if let Some(reader) = claim.readers.iter().find(|&&r| r != item) {
                panic!("block {:?} read by item {:?} and written by item {:?}", key, reader, item);
            }
            claim.writer = Some(item);
        } else if !claim.readers.contains(&item) {
            claim.readers.push(item);
        }
    }
}

/// Block-granular view of an [`NdData`] that several workers can hold at once.
///
/// Within one phase of the solve every block is written by at most one work
/// item and blocks that are written are not read by any other item. The
/// accessors are `unsafe` because that partitioning is what makes the
/// returned slices non-aliasing. Debug builds check it: every access names
/// its work item and a conflicting claim within a phase panics.
pub(crate) struct SharedNdData<'a> {
    ptr: SendPtr,
    layout: NdLayout,
    #[cfg(debug_assertions)]
    claims: AccessLog,
    _marker: PhantomData<&'a mut [f64]>,
}

impl<'a> SharedNdData<'a> {
    /// Start a new phase; claims of the previous one no longer conflict.
    pub(crate) fn begin_phase(&self) {
        #[cfg(debug_assertions)]
        self.claims.clear();
    }

    #[inline]
    fn claim(&self, item: WorkItem, index: usize, level: usize, block: Block, write: bool) {
        #[cfg(debug_assertions)]
        self.claims.record(item, (index, level, block), write);
        #[cfg(not(debug_assertions))]
        let _ = (item, index, level, block, write);
    }

    /// # Safety
    ///
    /// No mutable view of the same block may be live while the returned view
    /// is in use.
    pub(crate) unsafe fn block(
        &self,
        index: usize,
        level: usize,
        block: Block,
        item: WorkItem,
    ) -> NdlqrResult<MatView<'a>> {
        let (offset, rows) = self.layout.block_offset(index, level, block)?;
        self.claim(item, index, level, block, false);
        let len = rows * self.layout.width;
        // SAFETY: offset + len lies inside the buffer (checked by
        // `block_offset`); aliasing is excluded by the caller.
        let slice = unsafe { std::slice::from_raw_parts(self.ptr.0.add(offset), len) };
        Ok(MatView::from_slice(slice, rows, self.layout.width))
    }

    /// # Safety
    ///
    /// No other view of the same block may be live while the returned view is
    /// in use.
    pub(crate) unsafe fn block_mut(
        &self,
        index: usize,
        level: usize,
        block: Block,
        item: WorkItem,
    ) -> NdlqrResult<MatViewMut<'a>> {
        let (offset, rows) = self.layout.block_offset(index, level, block)?;
        self.claim(item, index, level, block, true);
        let len = rows * self.layout.width;
        // SAFETY: see `block`; the caller guarantees exclusive access.
        let slice = unsafe { std::slice::from_raw_parts_mut(self.ptr.0.add(offset), len) };
        Ok(MatViewMut::from_slice(slice, rows, self.layout.width))
    }
}
