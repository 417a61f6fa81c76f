//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use ndlqr_core::{LqrData, LqrProblem};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Horizon-8 problem with 6 states and 3 inputs: a double integrator per axis
/// with dt = 0.1, unit running state cost, 0.01 input cost and terminal state
/// cost 10.
pub fn double_integrator_problem() -> LqrProblem {
    let (n, m, nh) = (6, 3, 8);
    let dt = 0.1;
    let lqrdata = (0..nh)
        .map(|k| {
            let mut data = LqrData::zeros(n, m);
            let scale = (k + 1) as f64;
            data.Q = vec![if k + 1 == nh { 10.0 } else { 1.0 }; n];
            data.R = vec![0.01; m];
            data.q = [-2.0, -1.2, -0.4, 0.4, 1.2, 2.0].iter().map(|v| v * scale).collect();
            data.r = [-1.0, 0.0, 1.0].iter().map(|v| v * scale).collect();
            data.d = vec![1.5; n];
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
    LqrProblem::new(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], lqrdata).unwrap()
}

/// Solution of [`double_integrator_problem`] from a dense factorization of
/// the full KKT matrix.
pub const DOUBLE_INTEGRATOR_SOLUTION: [f64; 117] = [
    -2.0790730276507428, 21.454070655237313, 91.3291518350432, 15.518655660395568, 12.253437635083635,
    -4.45771877655798, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0, -71.72609311778103, -68.7073410232177,
    -20.55823631689857, -1.0790730276507428, 23.654070655237312, 89.72915183504321, 17.226562963160642,
    5.6880305695599045, -12.430633960062302, 1.9413695344110944, 0.4564632948839114, 3.0972088184155075,
    -7.672609311778104, -2.3707341023217703, -3.555823631689857, -40.50194403041847, -43.78884303864004,
    -27.53592520796153, 0.9795574379381629, 25.5976073603534, 87.4319430166277, 24.00121653114493,
    3.0990039358463353, -21.618004630035216, 2.4715988830811915, 1.500445669458534, 4.103946829206715,
    -10.222803714819952, -5.249618406185775, -4.80941615248601, -27.986223182220115, -33.637642574873716,
    -29.65011713079764, 4.507958554856971, 27.69716169089487, 84.52799618742098, 32.57322439047918,
    1.9789061729426232, -31.261388096291306, 2.8093873956880966, 2.3072956159655877, 4.974754628304126,
    -11.521426033041964, -7.113382663673146, -6.274427865565774, -20.09721865562706, -27.82795532869301,
    -29.55377691318614, 9.698571159168875, 30.189866074929284, 81.15324155911685, 41.524793307604256,
    1.2733022291228409, -41.102284386637216, 3.0567586991057647, 2.9568175729548076, 5.699542957181617,
    -12.03114789860467, -8.396178196542447, -7.729805556884388, -7.238505832057761, -20.07828000566565,
    -27.548362401504217, 16.64181246006311, 33.23304850197448, 77.45369860193523, 49.89175996020261,
    0.3461755754678393, -51.11784868994635, 3.317451380085007, 3.5168083532722365, 6.28882058948566,
    -11.254998481810446, -8.904006197109013, -8.98464179703481, 25.194596119858303, -2.0436976514174474,
    -21.88549206465963, 25.324361079978104, 36.91624014870224, 73.56487801244957, 56.21432233401525,
    -1.6414422422933708, -61.4896946941565, 3.8179245125032537, 4.116189245304248, 6.780928949458881,
    -7.235538869824616, -7.608375962250756, -9.673191003500772, 111.25460624533854, 44.93068825212515,
    -7.042988561947079, 35.50643656747485, 41.20005090339799, 69.58394906299068, 57.09921754709239,
    -6.553071370382414, -72.7748985969548, 5.150643656747485, 5.080005090339799, 7.278394906299068,
    5.389921754709238, -1.6153071370382412, -8.87748985969548,
];

/// Random well-conditioned problem: positive diagonal costs and dynamics
/// close to identity.
pub fn random_problem(nstates: usize, ninputs: usize, nhorizon: usize, seed: u64) -> LqrProblem {
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
            data.c = rng.gen_range(0.0..1.0);
            for j in 0..n {
                for i in 0..n {
                    let base = if i == j { 1.0 } else { 0.0 };
                    data.A[j * n + i] = base + rng.gen_range(-0.1..0.1);
                }
            }
            for v in data.B.iter_mut() {
                *v = rng.gen_range(-0.5..0.5);
            }
            data
        })
        .collect();
    let x0 = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    LqrProblem::new(x0, lqrdata).unwrap()
}

/// Solve the full KKT system with a dense LU factorization.
pub fn dense_kkt_solve(prob: &LqrProblem) -> Vec<f64> {
    let (n, m, nh) = (prob.nstates(), prob.ninputs(), prob.nhorizon);
    let nv = prob.nvars();
    let stride = 2 * n + m;
    let mut kkt = DMatrix::<f64>::zeros(nv, nv);
    let mut rhs = DVector::<f64>::zeros(nv);

    for i in 0..n {
        kkt[(i, n + i)] = -1.0;
        kkt[(n + i, i)] = -1.0;
        rhs[i] = -prob.x0[i];
    }
    for (k, data) in prob.lqrdata.iter().enumerate() {
        let xo = k * stride + n;
        let uo = k * stride + 2 * n;
        for i in 0..n {
            kkt[(xo + i, xo + i)] = data.Q[i];
            rhs[xo + i] = -data.q[i];
        }
        if k + 1 == nh {
            continue;
        }
        let lo = (k + 1) * stride;
        for i in 0..m {
            kkt[(uo + i, uo + i)] = data.R[i];
            rhs[uo + i] = -data.r[i];
        }
        for i in 0..n {
            rhs[lo + i] = -data.d[i];
            for j in 0..n {
                let a = data.A[j * n + i];
                kkt[(lo + i, xo + j)] = a;
                kkt[(xo + j, lo + i)] = a;
            }
            for j in 0..m {
                let b = data.B[j * n + i];
                kkt[(lo + i, uo + j)] = b;
                kkt[(uo + j, lo + i)] = b;
            }
            kkt[(lo + i, lo + n + i)] = -1.0;
            kkt[(lo + n + i, lo + i)] = -1.0;
        }
    }
    let soln = kkt.lu().solve(&rhs).expect("KKT matrix is singular");
    soln.as_slice().to_vec()
}

pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(0.0_f64, |acc, (x, y)| acc.max((x - y).abs()))
}
