//! ndlqr: parallel nested-dissection solver for linear-quadratic regulators
//!
//! Solves the KKT system of an equality-constrained LQR problem
//!
//! ```text
//! minimize    sum_k 0.5 x_k' Q_k x_k + q_k' x_k + 0.5 u_k' R_k u_k + r_k' u_k
//! subject to  x_{k+1} = A_k x_k + B_k u_k + d_k,   x_0 = x0
//! ```
//!
//! over a horizon of `N = 2^d` knot points. Instead of the sequential Riccati
//! recursion, the system is eliminated by nested dissection over a balanced
//! binary tree of knot points, so every level of the elimination can be
//! spread over a pool of worker threads.
//!
//! # Components
//!
//! - [`tree`]: the ordered binary tree that fixes the elimination order
//! - [`nddata`]: block storage for the KKT data, factorization and solution
//! - [`cholesky_factors`]: cache of the Cholesky factors of every diagonal and
//!   separator block
//! - [`nested_dissection`]: the per-level elimination phases
//! - [`solver`]: the orchestrator owning all of the above
//!
//! Dense kernels go through the [`linalg::DenseBackend`] trait; `nalgebra` is
//! the default, `faer` is available behind the `faer` feature.
//!
//! # Example
//!
//! ```ignore
//! use ndlqr_core::{LqrProblem, NdLqrSolver};
//!
//! let prob = LqrProblem::from_json_file("problem.json")?;
//! let mut solver = NdLqrSolver::new(prob.nstates(), prob.ninputs(), prob.nhorizon)?;
//! solver.initialize(&prob)?;
//! solver.solve()?;
//!
//! println!("{}", solver.profile());
//! println!("x_0 = {:?}", solver.knot_solution(0)?.1);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // backend kernels mirror BLAS signatures

pub mod cholesky_factors;
pub mod error;
pub mod linalg;
pub mod nddata;
pub mod nested_dissection;
pub mod problem;
pub mod profile;
pub mod riccati;
pub mod settings;
pub mod solver;
pub mod tree;

pub use cholesky_factors::{CholeskyBlock, CholeskyFactors, CholeskyInfo};
pub use error::{NdlqrError, NdlqrResult};
pub use linalg::{BackendError, BackendKind, DenseBackend, NalgebraBackend, ReferenceBackend};
#[cfg(feature = "faer")]
pub use linalg::FaerBackend;
pub use nddata::{Block, NdData, NdFactor, NdFactorMut, NdLayout};
pub use nested_dissection::work_range;
pub use problem::{LqrData, LqrProblem};
pub use profile::{SolvePhase, SolveProfile};
pub use riccati::RiccatiSolver;
pub use settings::SolverSettings;
pub use solver::NdLqrSolver;
pub use tree::{BinaryNode, OrderedBinaryTree, UnitRange};
