//! Error types for the nested-dissection solver.

use crate::cholesky_factors::CholeskyBlock;
use crate::linalg::BackendError;
use thiserror::Error;

/// Errors that can occur while building or running the solver.
#[derive(Error, Debug)]
pub enum NdlqrError {
    /// Horizon length is not a power of two (or is too short)
    #[error("Invalid horizon length {0}: must be a power of two and at least 2")]
    InvalidHorizon(usize),

    /// State, input, or block dimensions are invalid
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Knot-point index outside the horizon
    #[error("Index {index} out of range (max {max})")]
    IndexOutOfRange { index: usize, max: usize },

    /// Tree level outside `0..depth`
    #[error("Level {level} out of range for tree of depth {depth}")]
    LevelOutOfRange { level: usize, depth: usize },

    /// Separator leaf outside the leaves of a level
    #[error("Leaf {leaf} out of range at level {level} ({count} leaves)")]
    LeafOutOfRange { leaf: usize, level: usize, count: usize },

    /// A diagonal or Schur-complement block failed to factor
    #[error("Cholesky factorization of {block} failed: {source}")]
    NotPositiveDefinite {
        block: CholeskyBlock,
        #[source]
        source: BackendError,
    },

    /// Problem data does not match the solver's shape
    #[error("Problem mismatch: {0}")]
    ProblemMismatch(String),

    /// `solve` was called without a freshly initialized right-hand side
    #[error("Solver has no initialized problem to solve")]
    NotInitialized,

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Dense kernel failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for solver operations.
pub type NdlqrResult<T> = Result<T, NdlqrError>;
