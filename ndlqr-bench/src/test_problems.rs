//! Problem generators for the driver.

use ndlqr_core::{LqrData, LqrProblem, NdlqrResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Point mass moving along `axes` independent axes with time step `dt`.
///
/// The state is `2 * axes` long (positions followed by velocities) and there
/// is one force input per axis.
pub fn double_integrator(axes: usize, nhorizon: usize, dt: f64) -> NdlqrResult<LqrProblem> {
    let (n, m) = (2 * axes, axes);
    let lqrdata = (0..nhorizon)
        .map(|k| {
            let mut data = LqrData::zeros(n, m);
            data.Q = vec![if k + 1 == nhorizon { 10.0 } else { 1.0 }; n];
            data.R = vec![0.01; m];
            for i in 0..n {
                data.A[i * n + i] = 1.0;
            }
            for i in 0..m {
                data.A[(i + m) * n + i] = dt;
                data.B[i * n + i] = 0.5 * dt * dt;
                data.B[i * n + i + m] = dt;
            }
            data
        })
        .collect();
    let x0 = (0..n).map(|i| if i < m { (i + 1) as f64 } else { 0.0 }).collect();
    LqrProblem::new(x0, lqrdata)
}

/// Random problem with positive diagonal costs and near-identity dynamics.
pub fn random_lqr(nstates: usize, ninputs: usize, nhorizon: usize, seed: u64) -> NdlqrResult<LqrProblem> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (n, m) = (nstates, ninputs);
    let lqrdata = (0..nhorizon)
        .map(|_| {
            let mut data = LqrData::zeros(n, m);
            data.Q = (0..n).map(|_| rng.gen_range(0.5..2.0)).collect();
            data.R = (0..m).map(|_| rng.gen_range(0.05..1.0)).collect();
            data.q = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            data.r = (0..m).map(|_| rng.gen_range(-1.0..1.0)).collect();
            data.d = (0..n).map(|_| rng.gen_range(-0.1..0.1)).collect();
            for j in 0..n {
                for i in 0..n {
                    let diag = if i == j { 1.0 } else { 0.0 };
                    data.A[j * n + i] = diag + rng.gen_range(-0.1..0.1);
                }
            }
            for v in data.B.iter_mut() {
                *v = rng.gen_range(-0.5..0.5);
            }
            data
        })
        .collect();
    let x0 = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    LqrProblem::new(x0, lqrdata)
}
