//! End-to-end tests of the nested-dissection solver.

mod common;

use approx::assert_abs_diff_eq;
use common::{dense_kkt_solve, double_integrator_problem, max_abs_diff, random_problem, DOUBLE_INTEGRATOR_SOLUTION};
use ndlqr_core::{
    BackendKind, CholeskyBlock, NdLqrSolver, NdlqrError, ReferenceBackend, RiccatiSolver, SolverSettings,
};

fn single_threaded() -> SolverSettings {
    SolverSettings::default().with_num_threads(1)
}

#[test]
fn test_double_integrator_reference_solution() {
    let prob = double_integrator_problem();
    let mut solver = NdLqrSolver::new(6, 3, 8).unwrap().with_settings(single_threaded());
    assert_eq!(solver.nvars(), 117);
    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();

    let soln = solver.solution();
    let first_dual = [
        -2.0790730276507428,
        21.454070655237313,
        91.3291518350432,
        15.518655660395568,
        12.253437635083635,
        -4.45771877655798,
    ];
    for (i, (&a, &b)) in soln[..6].iter().zip(first_dual.iter()).enumerate() {
        assert!((a - b).abs() < 1e-6, "λ0[{}]: {} vs {}", i, a, b);
    }
    for (&a, &b) in soln.iter().zip(DOUBLE_INTEGRATOR_SOLUTION.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    assert!(prob.kkt_residual(soln).unwrap() < 1e-8);
}

#[test]
fn test_repeated_solves_are_identical() {
    let prob = double_integrator_problem();
    let mut solver = NdLqrSolver::new(6, 3, 8).unwrap().with_settings(single_threaded());
    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();
    let first = solver.solution().to_vec();

    for _ in 0..3 {
        solver.reset();
        solver.initialize(&prob).unwrap();
        solver.solve().unwrap();
        assert_eq!(solver.solution(), first.as_slice());
    }

    let mut out = vec![0.0; 200];
    assert_eq!(solver.copy_solution(&mut out), 117);
    assert_eq!(&out[..117], first.as_slice());
    assert!(out[117..].iter().all(|&v| v == 0.0));
}

#[test]
fn test_matches_dense_and_riccati() {
    for (seed, nhorizon) in [(1, 2), (2, 4), (3, 16), (4, 32), (5, 64)] {
        let prob = random_problem(5, 2, nhorizon, seed);
        let mut solver = NdLqrSolver::new(5, 2, nhorizon).unwrap().with_settings(single_threaded());
        solver.initialize(&prob).unwrap();
        solver.solve().unwrap();

        let dense = dense_kkt_solve(&prob);
        let scale = dense.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        let err = max_abs_diff(solver.solution(), &dense);
        assert!(err < 1e-9 * scale, "N={} dense err {} (scale {})", nhorizon, err, scale);

        let mut riccati = RiccatiSolver::new(&prob).unwrap();
        riccati.solve().unwrap();
        let err = max_abs_diff(solver.solution(), riccati.solution());
        assert!(err < 1e-9 * scale, "N={} riccati err {}", nhorizon, err);

        let residual = prob.kkt_residual(solver.solution()).unwrap();
        assert!(residual < 1e-9 * scale, "N={} residual {}", nhorizon, residual);
        let cost_nd = prob.objective(solver.solution()).unwrap();
        let cost_ric = prob.objective(riccati.solution()).unwrap();
        assert!((cost_nd - cost_ric).abs() < 1e-8 * cost_ric.abs().max(1.0));
    }
}

#[test]
fn test_deep_horizons_match_riccati() {
    // depths 8..=10; the dual-update gating is exercised at every level
    for (seed, nhorizon) in [(21, 256), (22, 512), (23, 1024)] {
        let prob = random_problem(3, 2, nhorizon, seed);
        let mut solver = NdLqrSolver::new(3, 2, nhorizon)
            .unwrap()
            .with_settings(SolverSettings::default().with_num_threads(4));
        solver.initialize(&prob).unwrap();
        solver.solve().unwrap();

        let mut riccati = RiccatiSolver::new(&prob).unwrap();
        riccati.solve().unwrap();
        let scale = riccati.solution().iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        let err = max_abs_diff(solver.solution(), riccati.solution());
        assert!(err < 1e-9 * scale, "N={} riccati err {} (scale {})", nhorizon, err, scale);

        let residual = prob.kkt_residual(solver.solution()).unwrap();
        assert!(residual < 1e-9 * scale, "N={} residual {}", nhorizon, residual);
    }
}

#[test]
fn test_reference_backend_agrees() {
    let prob = random_problem(4, 3, 16, 11);
    let mut nalgebra_solver = NdLqrSolver::new(4, 3, 16).unwrap().with_settings(single_threaded());
    let mut reference_solver = NdLqrSolver::with_backend(4, 3, 16, ReferenceBackend)
        .unwrap()
        .with_settings(single_threaded());
    for solver_soln in [
        {
            nalgebra_solver.initialize(&prob).unwrap();
            nalgebra_solver.solve().unwrap();
            nalgebra_solver.solution().to_vec()
        },
        {
            reference_solver.initialize(&prob).unwrap();
            reference_solver.solve().unwrap();
            reference_solver.solution().to_vec()
        },
    ] {
        let err = max_abs_diff(&solver_soln, &dense_kkt_solve(&prob));
        assert!(err < 1e-9, "err {}", err);
    }
}

#[cfg(feature = "faer")]
#[test]
fn test_faer_backend_agrees() {
    use ndlqr_core::FaerBackend;

    let prob = double_integrator_problem();
    let mut solver = NdLqrSolver::with_backend(6, 3, 8, FaerBackend::default())
        .unwrap()
        .with_settings(single_threaded());
    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();
    assert!(max_abs_diff(solver.solution(), &DOUBLE_INTEGRATOR_SOLUTION) < 1e-6);
    assert_eq!(solver.cholesky_factors().q_factor(3).unwrap().backend(), Some(BackendKind::Faer));
}

#[test]
fn test_rejects_bad_shapes() {
    for nhorizon in [0, 1, 3, 6, 100] {
        assert!(
            matches!(NdLqrSolver::new(6, 3, nhorizon), Err(NdlqrError::InvalidHorizon(_))),
            "N = {}",
            nhorizon
        );
    }
    assert!(matches!(NdLqrSolver::new(0, 3, 8), Err(NdlqrError::InvalidDimensions(_))));

    let prob = double_integrator_problem();
    let mut solver = NdLqrSolver::new(6, 3, 16).unwrap();
    assert!(matches!(solver.initialize(&prob), Err(NdlqrError::ProblemMismatch(_))));
    let mut solver = NdLqrSolver::new(5, 3, 8).unwrap();
    assert!(matches!(solver.initialize(&prob), Err(NdlqrError::ProblemMismatch(_))));
}

#[test]
fn test_cache_lifecycle() {
    let prob = double_integrator_problem();
    let mut solver = NdLqrSolver::new(6, 3, 8).unwrap().with_settings(single_threaded());
    let cache = solver.cholesky_factors();
    assert_eq!(cache.len(), 2 * 8 + 4 + 2 + 1);
    assert_eq!(cache.live_count(), 0);
    assert!(cache.slots().iter().all(|s| s.is_freed()));

    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();
    let cache = solver.cholesky_factors();
    // Q for all 8 knots, R for the first 7, every separator
    assert_eq!(cache.live_count(), 8 + 7 + 7);
    assert!(!cache.separator_factor(0, 2).unwrap().is_freed());
    assert!(cache.r_factor(6).unwrap().success());
    assert_eq!(cache.q_factor(0).unwrap().backend(), Some(BackendKind::Nalgebra));

    // a second solve replaces every handle without accumulating
    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();
    assert_eq!(solver.cholesky_factors().live_count(), 8 + 7 + 7);

    let mut reference = NdLqrSolver::with_backend(6, 3, 8, ReferenceBackend)
        .unwrap()
        .with_settings(single_threaded());
    reference.initialize(&prob).unwrap();
    reference.solve().unwrap();
    let cache = reference.cholesky_factors();
    assert_eq!(cache.live_count(), 0);
    assert!(cache.separator_factor(0, 2).unwrap().is_factored());
}

#[test]
fn test_indefinite_cost_reports_block() {
    let mut prob = double_integrator_problem();
    prob.lqrdata[5].R[1] = -1.0;
    let mut solver = NdLqrSolver::new(6, 3, 8).unwrap().with_settings(single_threaded());
    solver.initialize(&prob).unwrap();
    let err = solver.solve().unwrap_err();
    assert!(
        matches!(err, NdlqrError::NotPositiveDefinite { block: CholeskyBlock::R(5), .. }),
        "{:?}",
        err
    );
    assert!(!solver.cholesky_factors().r_factor(5).unwrap().success());
}

#[test]
fn test_profile_is_recorded() {
    let prob = random_problem(4, 2, 32, 7);
    let mut solver = NdLqrSolver::new(4, 2, 32).unwrap().with_settings(SolverSettings::default().with_num_threads(3));
    assert_eq!(solver.num_threads(), 3);
    solver.initialize(&prob).unwrap();
    solver.solve().unwrap();

    let profile = solver.profile();
    assert_eq!(profile.num_threads, 3);
    assert!(profile.total > std::time::Duration::ZERO);
    assert!(profile.phase_sum() <= profile.total);
    assert!(profile.to_string().contains("Shur"));

    solver.reset();
    assert_eq!(*solver.profile(), ndlqr_core::SolveProfile::default());
}

#[test]
fn test_json_problem_round_trip_solves() {
    let prob = double_integrator_problem();
    let text = prob.to_json_string().unwrap();
    let loaded = ndlqr_core::LqrProblem::from_json_str(&text).unwrap();
    assert_eq!(loaded, prob);

    let mut solver = NdLqrSolver::new(loaded.nstates(), loaded.ninputs(), loaded.nhorizon)
        .unwrap()
        .with_settings(single_threaded());
    solver.initialize(&loaded).unwrap();
    solver.solve().unwrap();
    assert!(max_abs_diff(solver.solution(), &DOUBLE_INTEGRATOR_SOLUTION) < 1e-6);
}
