//! Configuration for the nested-dissection solver.

use std::env;

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolverSettings {
    /// Worker count for `solve` (None = half the logical cores, at least one).
    pub num_threads: Option<usize>,

    /// Log the phase profile after every solve.
    pub verbose: bool,
}

impl SolverSettings {
    /// Defaults overridden by `NDLQR_THREADS` and `NDLQR_VERBOSE`.
    pub fn from_env() -> Self {
        let num_threads = env::var("NDLQR_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&t| t > 0);

        let verbose = match env::var("NDLQR_VERBOSE") {
            Ok(v) => v != "0" && v.to_lowercase() != "false",
            Err(_) => false,
        };

        Self { num_threads, verbose }
    }

    /// Set the worker count.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads.max(1));
        self
    }

    /// Enable/disable profile logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Worker count to request from the pool.
    pub fn resolved_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(default_num_threads)
    }
}

/// Half the logical cores, at least one.
pub fn default_num_threads() -> usize {
    (rayon::current_num_threads() / 2).max(1)
}
