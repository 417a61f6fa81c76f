mod reference;

pub use reference::ReferenceBackend;

#[cfg(feature = "faer")]
mod faer_llt;

#[cfg(feature = "faer")]
pub use faer_llt::FaerBackend;
