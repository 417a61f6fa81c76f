//! Sequential Riccati recursion for the same LQR problem.
//!
//! Produces the solution in the same `[λ, x, u, ..., λ, x]` ordering as the
//! nested-dissection solver, with `λ_k = P_k x_k + p_k`. Runs in `O(N)` on a
//! single thread and is used to cross-check the parallel solver.

use crate::cholesky_factors::CholeskyBlock;
use crate::error::{NdlqrError, NdlqrResult};
use crate::linalg::BackendError;
use crate::problem::LqrProblem;
use nalgebra::{Cholesky, DMatrix, DVector};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RiccatiSolver<'a> {
    prob: &'a LqrProblem,
    cost_to_go: Vec<DMatrix<f64>>,
    cost_to_go_grad: Vec<DVector<f64>>,
    gains: Vec<DMatrix<f64>>,
    feedforward: Vec<DVector<f64>>,
    soln: Vec<f64>,
    backward_time: Duration,
    forward_time: Duration,
}

impl<'a> RiccatiSolver<'a> {
    pub fn new(prob: &'a LqrProblem) -> NdlqrResult<Self> {
        prob.validate().map_err(NdlqrError::ProblemMismatch)?;
        let (n, m, nh) = (prob.nstates(), prob.ninputs(), prob.nhorizon);
        Ok(Self {
            prob,
            cost_to_go: vec![DMatrix::zeros(n, n); nh],
            cost_to_go_grad: vec![DVector::zeros(n); nh],
            gains: vec![DMatrix::zeros(m, n); nh.saturating_sub(1)],
            feedforward: vec![DVector::zeros(m); nh.saturating_sub(1)],
            soln: vec![0.0; prob.nvars()],
            backward_time: Duration::ZERO,
            forward_time: Duration::ZERO,
        })
    }

    pub fn solve(&mut self) -> NdlqrResult<()> {
        let start = Instant::now();
        self.backward_pass()?;
        self.backward_time = start.elapsed();

        let start = Instant::now();
        self.forward_pass();
        self.forward_time = start.elapsed();

        log::debug!(
            "riccati: backward {:.3} ms, forward {:.3} ms",
            self.backward_time.as_secs_f64() * 1e3,
            self.forward_time.as_secs_f64() * 1e3
        );
        Ok(())
    }

    fn backward_pass(&mut self) -> NdlqrResult<()> {
        let prob = self.prob;
        let nh = prob.nhorizon;
        let last = &prob.lqrdata[nh - 1];
        self.cost_to_go[nh - 1] = DMatrix::from_diagonal(&DVector::from_column_slice(&last.Q));
        self.cost_to_go_grad[nh - 1] = DVector::from_column_slice(&last.q);

        for k in (0..nh - 1).rev() {
            let data = &prob.lqrdata[k];
            let (a, b) = (data.a(), data.b());
            let p_next = &self.cost_to_go[k + 1];
            let tmp = p_next * DVector::from_column_slice(&data.d) + &self.cost_to_go_grad[k + 1];

            let qx = DVector::from_column_slice(&data.q) + a.tr_mul(&tmp);
            let qu = DVector::from_column_slice(&data.r) + b.tr_mul(&tmp);
            let pa = p_next * a;
            let qxx = DMatrix::from_diagonal(&DVector::from_column_slice(&data.Q)) + a.tr_mul(&pa);
            let quu = DMatrix::from_diagonal(&DVector::from_column_slice(&data.R)) + b.tr_mul(&(p_next * b));
            let qux = b.tr_mul(&pa);

            let chol = Cholesky::new(quu).ok_or_else(|| NdlqrError::NotPositiveDefinite {
                block: CholeskyBlock::R(k),
                source: BackendError::Message(format!("input Hessian at knot {} is not positive definite", k)),
            })?;
            let gain = -chol.solve(&qux);
            let ff = -chol.solve(&qu);

            let mut p = qxx + qux.tr_mul(&gain);
            // symmetrize against roundoff
            let pt = p.transpose();
            p += pt;
            p *= 0.5;

            self.cost_to_go_grad[k] = qx + qux.tr_mul(&ff);
            self.cost_to_go[k] = p;
            self.gains[k] = gain;
            self.feedforward[k] = ff;
        }
        Ok(())
    }

    fn forward_pass(&mut self) {
        let prob = self.prob;
        let (n, m, nh) = (prob.nstates(), prob.ninputs(), prob.nhorizon);
        let stride = 2 * n + m;
        let mut x = DVector::from_column_slice(&prob.x0);
        for k in 0..nh {
            let base = k * stride;
            let lambda = &self.cost_to_go[k] * &x + &self.cost_to_go_grad[k];
            self.soln[base..base + n].copy_from_slice(lambda.as_slice());
            self.soln[base + n..base + 2 * n].copy_from_slice(x.as_slice());
            if k + 1 < nh {
                let data = &prob.lqrdata[k];
                let u = &self.gains[k] * &x + &self.feedforward[k];
                self.soln[base + 2 * n..base + stride].copy_from_slice(u.as_slice());
                x = data.a() * &x + data.b() * &u + DVector::from_column_slice(&data.d);
            }
        }
    }

    pub fn solution(&self) -> &[f64] {
        &self.soln
    }

    /// Copy the solution into `out`; returns the number of values written.
    pub fn copy_solution(&self, out: &mut [f64]) -> usize {
        let len = out.len().min(self.soln.len());
        out[..len].copy_from_slice(&self.soln[..len]);
        len
    }

    pub fn backward_time(&self) -> Duration {
        self.backward_time
    }

    pub fn forward_time(&self) -> Duration {
        self.forward_time
    }

    /// Feedback gain `K_k` of `u_k = K_k x_k + d_k`.
    pub fn gain(&self, k: usize) -> Option<&DMatrix<f64>> {
        self.gains.get(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LqrData;

    fn scalar_problem() -> LqrProblem {
        let mut data = LqrData::zeros(1, 1);
        data.Q = vec![1.0];
        data.R = vec![1.0];
        data.A = vec![1.0];
        data.B = vec![1.0];
        LqrProblem::new(vec![1.0], vec![data; 2]).unwrap()
    }

    #[test]
    fn test_two_step_scalar() {
        // min 0.5 x0^2 + 0.5 u0^2 + 0.5 x1^2, x1 = x0 + u0, x0 = 1
        // => u0 = -0.5, x1 = 0.5, λ1 = 0.5, λ0 = x0 + λ1 = 1.5
        let prob = scalar_problem();
        let mut solver = RiccatiSolver::new(&prob).unwrap();
        solver.solve().unwrap();
        let expected = [1.5, 1.0, -0.5, 0.5, 0.5];
        for (a, b) in solver.solution().iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-14, "{} vs {}", a, b);
        }
        assert!(prob.kkt_residual(solver.solution()).unwrap() < 1e-14);
        assert!((solver.gain(0).unwrap()[(0, 0)] + 0.5).abs() < 1e-14);

        let mut out = [0.0; 3];
        assert_eq!(solver.copy_solution(&mut out), 3);
        for (a, b) in out.iter().zip(solver.solution()) {
            assert_eq!(a, b);
        }
        assert!((out[2] + 0.5).abs() < 1e-14);
    }

    #[test]
    fn test_indefinite_input_cost() {
        let mut prob = scalar_problem();
        prob.lqrdata[0].R = vec![-5.0];
        let mut solver = RiccatiSolver::new(&prob).unwrap();
        let err = solver.solve().unwrap_err();
        assert!(matches!(err, NdlqrError::NotPositiveDefinite { block: CholeskyBlock::R(0), .. }));
    }
}
