use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SolvePhase {
    Leaves,
    Products,
    Cholesky,
    CholSolve,
    Shur,
}

/// Wall-clock time spent in each phase of the most recent solve.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SolveProfile {
    pub total: Duration,
    pub leaves: Duration,
    pub products: Duration,
    pub cholesky: Duration,
    pub cholsolve: Duration,
    pub shur: Duration,
    pub num_threads: usize,
}

impl SolveProfile {
    pub fn scoped(&mut self, phase: SolvePhase) -> PhaseGuard<'_> {
        PhaseGuard { phase, start: Instant::now(), profile: self }
    }

    pub fn add(&mut self, phase: SolvePhase, dt: Duration) {
        match phase {
            SolvePhase::Leaves => self.leaves += dt,
            SolvePhase::Products => self.products += dt,
            SolvePhase::Cholesky => self.cholesky += dt,
            SolvePhase::CholSolve => self.cholsolve += dt,
            SolvePhase::Shur => self.shur += dt,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sum of the per-phase times; at most `total`.
    pub fn phase_sum(&self) -> Duration {
        self.leaves + self.products + self.cholesky + self.cholsolve + self.shur
    }

    fn rows(&self) -> [(&'static str, Duration); 6] {
        [
            ("Total", self.total),
            ("Leaves", self.leaves),
            ("Products", self.products),
            ("Cholesky", self.cholesky),
            ("CholSolve", self.cholsolve),
            ("Shur", self.shur),
        ]
    }

    /// Side-by-side table against another profile, with the speedup of
    /// `self` relative to `other`.
    pub fn compare(&self, other: &SolveProfile) -> String {
        let mut out = format!(
            "{:<10} {:>12} {:>12} {:>9}\n",
            "Phase",
            format!("{} thr (ms)", self.num_threads),
            format!("{} thr (ms)", other.num_threads),
            "speedup"
        );
        for ((name, a), (_, b)) in self.rows().iter().zip(other.rows().iter()) {
            let (a_ms, b_ms) = (ms(*a), ms(*b));
            let speedup = if a_ms > 0.0 { b_ms / a_ms } else { f64::NAN };
            out.push_str(&format!("{:<10} {:>12.3} {:>12.3} {:>9.2}\n", name, a_ms, b_ms, speedup));
        }
        out
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

impl fmt::Display for SolveProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Solve profile ({} threads)", self.num_threads)?;
        for (name, d) in self.rows() {
            writeln!(f, "  {:<10} {:>10.3} ms", name, ms(d))?;
        }
        Ok(())
    }
}

pub struct PhaseGuard<'a> {
    phase: SolvePhase,
    start: Instant,
    profile: &'a mut SolveProfile,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.profile.add(self.phase, self.start.elapsed());
    }
}
