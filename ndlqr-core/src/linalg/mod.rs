//! Linear algebra layer.
//!
//! Column-major block views, the dense kernel backend trait, and its
//! implementations.

pub mod dense;
pub mod kernels;
pub mod backend;
pub mod backends;

pub use backend::{BackendError, BackendKind, DenseBackend, NalgebraBackend};
pub use backends::ReferenceBackend;
#[cfg(feature = "faer")]
pub use backends::FaerBackend;
pub use dense::{MatView, MatViewMut};
