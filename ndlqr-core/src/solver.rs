//! Solver orchestration: owns every allocation and drives the parallel
//! schedule.

use crate::cholesky_factors::CholeskyFactors;
use crate::error::{NdlqrError, NdlqrResult};
use crate::linalg::{DenseBackend, MatViewMut, NalgebraBackend};
use crate::nddata::NdData;
use crate::nested_dissection::{NdWorkspace, Target};
use crate::problem::LqrProblem;
use crate::profile::{SolvePhase, SolveProfile};
use crate::settings::SolverSettings;
use crate::tree::OrderedBinaryTree;
use std::time::Instant;

/// Parallel nested-dissection solver for LQR problems of a fixed shape.
///
/// All memory is allocated by the constructor. A solve cycle is
/// [`initialize`](Self::initialize) followed by [`solve`](Self::solve); the
/// solution is then available through [`solution`](Self::solution). The
/// cached Cholesky factors are reused by the next cycle.
pub struct NdLqrSolver<B: DenseBackend = NalgebraBackend> {
    nstates: usize,
    ninputs: usize,
    nhorizon: usize,
    tree: OrderedBinaryTree,
    data: NdData,
    fact: NdData,
    soln: NdData,
    /// `Q_k` (`n x n`) followed by `R_k` (`m x m`) for every knot.
    diagonals: Vec<f64>,
    cholfacts: CholeskyFactors<B::Factor>,
    backend: B,
    settings: SolverSettings,
    profile: SolveProfile,
    initialized: bool,
}

impl NdLqrSolver<NalgebraBackend> {
    /// Solver with the default backend and settings from the environment.
    pub fn new(nstates: usize, ninputs: usize, nhorizon: usize) -> NdlqrResult<Self> {
        Self::with_backend(nstates, ninputs, nhorizon, NalgebraBackend)
    }
}

impl<B: DenseBackend> NdLqrSolver<B> {
    pub fn with_backend(nstates: usize, ninputs: usize, nhorizon: usize, backend: B) -> NdlqrResult<Self> {
        let tree = OrderedBinaryTree::new(nhorizon)?;
        let depth = tree.depth();
        let data = NdData::new(nstates, ninputs, nhorizon, nstates)?;
        let fact = NdData::new(nstates, ninputs, nhorizon, nstates)?;
        let soln = NdData::new(nstates, ninputs, nhorizon, 1)?;
        let cholfacts = CholeskyFactors::new(depth, nhorizon)?;
        let diagonals = vec![0.0; nhorizon * (nstates * nstates + ninputs * ninputs)];

        log::info!(
            "ndlqr: nstates={}, ninputs={}, nhorizon={}, depth={}, backend={}",
            nstates,
            ninputs,
            nhorizon,
            depth,
            backend.kind()
        );

        Ok(Self {
            nstates,
            ninputs,
            nhorizon,
            tree,
            data,
            fact,
            soln,
            diagonals,
            cholfacts,
            backend,
            settings: SolverSettings::from_env(),
            profile: SolveProfile::default(),
            initialized: false,
        })
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }

    pub fn ninputs(&self) -> usize {
        self.ninputs
    }

    pub fn nhorizon(&self) -> usize {
        self.nhorizon
    }

    /// Length of the solution vector.
    pub fn nvars(&self) -> usize {
        (2 * self.nstates + self.ninputs) * self.nhorizon - self.ninputs
    }

    pub fn tree(&self) -> &OrderedBinaryTree {
        &self.tree
    }

    pub fn cholesky_factors(&self) -> &CholeskyFactors<B::Factor> {
        &self.cholfacts
    }

    /// KKT coefficients written by `initialize`.
    pub fn data(&self) -> &NdData {
        &self.data
    }

    /// Working factorization of the last solve.
    pub fn factorization(&self) -> &NdData {
        &self.fact
    }

    /// Timing of the last solve.
    pub fn profile(&self) -> &SolveProfile {
        &self.profile
    }

    /// Request a worker count for subsequent solves (at least one).
    pub fn set_num_threads(&mut self, num_threads: usize) {
        if num_threads == 0 {
            log::warn!("requested 0 threads; using 1");
        }
        self.settings.num_threads = Some(num_threads.max(1));
    }

    /// Worker count the next solve will request.
    pub fn num_threads(&self) -> usize {
        self.settings.resolved_threads()
    }

    /// Zero the data, factorization, right-hand side, diagonal blocks and
    /// timings.
    pub fn reset(&mut self) {
        self.data.reset();
        self.fact.reset();
        self.soln.reset();
        self.diagonals.fill(0.0);
        self.profile.reset();
        self.initialized = false;
    }

    /// Load a problem of matching shape.
    ///
    /// The right-hand side is stored negated, so the system solved is
    /// `M z = -g`.
    pub fn initialize(&mut self, prob: &LqrProblem) -> NdlqrResult<()> {
        prob.validate().map_err(NdlqrError::ProblemMismatch)?;
        if prob.nstates() != self.nstates || prob.ninputs() != self.ninputs || prob.nhorizon != self.nhorizon {
            return Err(NdlqrError::ProblemMismatch(format!(
                "problem has shape (n={}, m={}, N={}), solver expects (n={}, m={}, N={})",
                prob.nstates(),
                prob.ninputs(),
                prob.nhorizon,
                self.nstates,
                self.ninputs,
                self.nhorizon
            )));
        }
        self.reset();

        let (n, m, nh) = (self.nstates, self.ninputs, self.nhorizon);
        let stride = n * n + m * m;

        self.soln.factor_mut(0, 0)?.lambda.as_mut_slice().copy_from_slice(&prob.x0);

        for (k, lqr) in prob.lqrdata.iter().enumerate() {
            let diag = &mut self.diagonals[k * stride..(k + 1) * stride];
            let (q_block, r_block) = diag.split_at_mut(n * n);
            MatViewMut::from_slice(q_block, n, n).set_diagonal(&lqr.Q);

            let mut z = self.soln.factor_mut(k, 0)?;
            z.state.as_mut_slice().copy_from_slice(&lqr.q);
            if k + 1 == nh {
                break;
            }
            MatViewMut::from_slice(r_block, m, m).set_diagonal(&lqr.R);
            z.input.as_mut_slice().copy_from_slice(&lqr.r);

            let level = self
                .tree
                .index_level(k)
                .ok_or(NdlqrError::IndexOutOfRange { index: k, max: nh - 2 })?;

            // C = [A'; B'] at the separator level of knot k
            let mut c = self.data.factor_mut(k, level)?;
            for j in 0..n {
                for i in 0..n {
                    c.state.set(i, j, lqr.A[i * n + j]);
                }
                for i in 0..m {
                    c.input.set(i, j, lqr.B[i * n + j]);
                }
            }
            self.data.factor_mut(k + 1, level)?.state.set_scaled_identity(-1.0);
            self.soln.factor_mut(k + 1, 0)?.lambda.as_mut_slice().copy_from_slice(&lqr.d);
        }

        let nvars = self.nvars();
        for v in self.soln.as_mut_slice()[..nvars].iter_mut() {
            *v = -*v;
        }
        self.initialized = true;
        Ok(())
    }

    /// Run the factor and solve passes.
    ///
    /// The diagonal blocks are factored in place, so every solve needs a
    /// fresh [`initialize`](Self::initialize).
    pub fn solve(&mut self) -> NdlqrResult<()> {
        if !self.initialized {
            return Err(NdlqrError::NotInitialized);
        }
        self.initialized = false;

        let nt = self.settings.resolved_threads();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(nt).build()?;

        self.profile.reset();
        let start = Instant::now();
        self.fact.reset();

        let Self { backend, tree, data, fact, soln, diagonals, cholfacts, profile, .. } = self;
        let ws = NdWorkspace {
            backend: &*backend,
            tree: &*tree,
            data: &*data,
            fact: fact.shared(),
            soln: soln.shared(),
        };
        let result = pool.install(|| run_schedule(&ws, diagonals, cholfacts, profile, nt));

        self.profile.total = start.elapsed();
        self.profile.num_threads = pool.current_num_threads();

        match &result {
            Ok(()) if self.settings.verbose => log::info!("{}", self.profile),
            Ok(()) => log::debug!("{}", self.profile),
            Err(e) => log::warn!("solve failed: {}", e),
        }
        result
    }

    /// Solution `[λ_0, x_0, u_0, ..., λ_{N-1}, x_{N-1}]` after a solve.
    pub fn solution(&self) -> &[f64] {
        &self.soln.as_slice()[..self.nvars()]
    }

    /// Copy the solution into `out`; returns the number of values written.
    pub fn copy_solution(&self, out: &mut [f64]) -> usize {
        let soln = self.solution();
        let len = out.len().min(soln.len());
        out[..len].copy_from_slice(&soln[..len]);
        len
    }

    /// Dual, state and input of knot `k` in the solution.
    pub fn knot_solution(&self, k: usize) -> NdlqrResult<(&[f64], &[f64], &[f64])> {
        let f = self.soln.factor(k, 0)?;
        let input: &[f64] = if k + 1 < self.nhorizon { f.input.as_slice() } else { &[] };
        Ok((f.lambda.as_slice(), f.state.as_slice(), input))
    }
}

fn run_schedule<B: DenseBackend>(
    ws: &NdWorkspace<'_, B>,
    diagonals: &mut [f64],
    cholfacts: &mut CholeskyFactors<B::Factor>,
    profile: &mut SolveProfile,
    nt: usize,
) -> NdlqrResult<()> {
    let depth = ws.tree.depth();
    {
        let _t = profile.scoped(SolvePhase::Leaves);
        ws.solve_leaves(diagonals, cholfacts.leaf_slots_mut(), nt)?;
    }

    for level in 0..depth {
        {
            let _t = profile.scoped(SolvePhase::Products);
            ws.inner_products(Target::Fact, level, nt)?;
        }
        {
            let _t = profile.scoped(SolvePhase::Cholesky);
            ws.factor_separators(cholfacts.level_slots_mut(level)?, level, nt)?;
        }
        {
            let _t = profile.scoped(SolvePhase::CholSolve);
            ws.solve_separators(cholfacts, Target::Fact, level, nt)?;
        }
        {
            let _t = profile.scoped(SolvePhase::Shur);
            ws.update_shur(Target::Fact, level, nt)?;
        }
    }

    for level in 0..depth {
        {
            let _t = profile.scoped(SolvePhase::Products);
            ws.inner_products(Target::Soln, level, nt)?;
        }
        {
            let _t = profile.scoped(SolvePhase::CholSolve);
            ws.solve_separators(cholfacts, Target::Soln, level, nt)?;
        }
        {
            let _t = profile.scoped(SolvePhase::Shur);
            ws.update_shur(Target::Soln, level, nt)?;
        }
    }
    Ok(())
}

impl<B: DenseBackend> Drop for NdLqrSolver<B> {
    fn drop(&mut self) {
        self.cholfacts.release_all(&self.backend);
    }
}

impl<B: DenseBackend> std::fmt::Debug for NdLqrSolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdLqrSolver")
            .field("nstates", &self.nstates)
            .field("ninputs", &self.ninputs)
            .field("nhorizon", &self.nhorizon)
            .field("backend", &self.backend.kind())
            .field("settings", &self.settings)
            .field("initialized", &self.initialized)
            .finish()
    }
}
