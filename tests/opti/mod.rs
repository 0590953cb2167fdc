use crate::init_logger;
use crate::models::{Contradictory, Overflowing, PinnedIntegrator, QuadraticDrift, Sheared};
use approx::assert_abs_diff_eq;
use rstest::*;
use scvx::dynamics::{Dynamics, LinearDynamics, PointMassLander};
use scvx::io::ConfigRepr;
use scvx::linalg::{Matrix2, SMatrix, Vector2};
use scvx::md::discretization::Discretizer;
use scvx::md::opti::scvx::{ScvxPhase, Termination};
use scvx::md::opti::solver::{ClarabelSolver, SolverSettings};
use scvx::md::opti::subproblem::dynamics_residuals;
use scvx::propagators::PropagationError;
use scvx::{ScvxConfig, ScvxError, SuccessiveConvexification, Trajectory};

fn double_integrator() -> LinearDynamics<2, 1> {
    LinearDynamics::new(
        Matrix2::new(0.0, 1.0, 0.0, 0.0),
        SMatrix::<f64, 2, 1>::new(0.0, 1.0),
        Vector2::zeros(),
        Vector2::new(1.0, 0.0),
        1.0,
    )
    .with_input_bound(2.0)
}

#[rstest]
#[case(1.0, 1.0)]
#[case(2.0, 0.5)]
fn pinned_control_single_iteration(#[case] u: f64, #[case] expected_sigma: f64) {
    init_logger();
    let dynamics = PinnedIntegrator { u };
    let cfg = ScvxConfig::builder().nodes(3).iterations(1).build();
    let mut scvx =
        SuccessiveConvexification::new(&dynamics, cfg, ClarabelSolver::default()).unwrap();
    assert_eq!(scvx.phase(), ScvxPhase::Initializing);

    let sol = scvx.solve().unwrap();
    assert_eq!(scvx.phase(), ScvxPhase::Terminated);
    assert_eq!(sol.iterations.len(), 1);
    assert!(!sol.converged);

    let report = sol.last_report().unwrap();
    assert!(report.norm2_nu < 1e-6);
    // x(sigma) = sigma * u = 1
    assert_abs_diff_eq!(sol.trajectory.sigma, expected_sigma, epsilon = 1e-6);
    for k in 0..3 {
        assert_abs_diff_eq!(sol.trajectory.inputs[(0, k)], u, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.trajectory.states[(0, k)], 0.5 * k as f64, epsilon = 1e-6);
    }
}

#[test]
fn dynamics_equalities_hold_at_solution() {
    init_logger();
    let dynamics = double_integrator();
    let cfg = ScvxConfig::builder().nodes(10).iterations(1).build();
    let mut scvx =
        SuccessiveConvexification::new(&dynamics, cfg.clone(), ClarabelSolver::default())
            .unwrap();
    let sol = scvx.solve().unwrap();

    // Affine models of the reference of that iteration
    let mut guess = Trajectory::zeros(2, 1, 10, dynamics.total_time_guess());
    dynamics.initialize(&mut guess).unwrap();
    let models = Discretizer::new(&dynamics, cfg.integrator)
        .discretize(&guess)
        .unwrap();

    let sub = scvx.subproblem().solution().unwrap();
    assert_eq!(sub.trajectory, sol.trajectory);
    for (k, residual) in dynamics_residuals(&models, &sub.trajectory)
        .iter()
        .enumerate()
    {
        assert_abs_diff_eq!(
            *residual,
            sub.virtual_control.column(k).into_owned(),
            epsilon = 1e-6
        );
    }
    // Boundary conditions and input bound
    assert_abs_diff_eq!(sol.trajectory.states[(0, 0)], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(sol.trajectory.states[(0, 9)], 1.0, epsilon = 1e-6);
    assert!(sol.trajectory.inputs.amax() <= 2.0 + 1e-6);
    // The sum of the virtual control norm matches its bound
    assert_abs_diff_eq!(sub.norm2_nu, sub.virtual_control.norm(), epsilon = 1e-6);
}

#[test]
fn quadratic_drift() {
    init_logger();
    let cfg = ScvxConfig::builder().nodes(10).iterations(10).build();
    let mut scvx =
        SuccessiveConvexification::new(&QuadraticDrift, cfg, ClarabelSolver::default()).unwrap();
    let sol = scvx.solve().unwrap();
    assert_eq!(sol.iterations.len(), 10);
    assert!(!sol.converged);

    // Virtual control norm is non increasing
    for pair in sol.iterations.windows(2) {
        assert!(
            pair[1].norm2_nu <= pair[0].norm2_nu + 1e-7,
            "{} > {}",
            pair[1].norm2_nu,
            pair[0].norm2_nu
        );
    }

    // Trust regions hold at every iteration
    let mut reference = Trajectory::zeros(1, 1, 10, QuadraticDrift.total_time_guess());
    QuadraticDrift.initialize(&mut reference).unwrap();
    for report in &sol.iterations {
        let traj = &report.trajectory;
        assert!((traj.sigma - reference.sigma).powi(2) <= report.delta_sigma + 1e-7);
        let xu_change = (&traj.states - &reference.states).norm_squared()
            + (&traj.inputs - &reference.inputs).norm_squared();
        assert!(xu_change <= report.delta_xu + 1e-6);
        reference = traj.clone();
    }

    let last = sol.last_report().unwrap();
    assert!(last.norm2_nu < 1e-6);
    assert!(last.max_defect < 1e-3);
    assert_abs_diff_eq!(
        sol.trajectory.sigma,
        QuadraticDrift::minimum_time(),
        epsilon = 0.05
    );
}

#[test]
fn converged_termination() {
    init_logger();
    let cfg = ScvxConfig::builder()
        .nodes(10)
        .iterations(30)
        .termination(Termination::Converged {
            virtual_control: 1e-5,
            trust_region: 1e-3,
        })
        .build();
    let mut scvx =
        SuccessiveConvexification::new(&QuadraticDrift, cfg, ClarabelSolver::default()).unwrap();
    let sol = scvx.solve().unwrap();
    assert!(sol.converged);
    assert!(sol.iterations.len() < 30);
    let last = sol.last_report().unwrap();
    assert!(last.norm2_nu <= 1e-5);
    assert!(last.delta_sigma <= 1e-3);
    assert!(last.delta_xu <= 1e-3);
}

#[test]
fn lander() {
    init_logger();
    let lander = PointMassLander::default();
    let cfg = ScvxConfig::builder()
        .nodes(15)
        .iterations(5)
        .parallel(true)
        .build();
    let mut scvx = SuccessiveConvexification::new(&lander, cfg, ClarabelSolver::default()).unwrap();
    let sol = scvx.solve().unwrap();
    assert_eq!(sol.iterations.len(), 5);

    let traj = &sol.trajectory;
    let tol = 1e-6;
    assert!(traj.sigma > 0.0);
    assert_abs_diff_eq!(traj.states[(0, 0)], lander.wet_mass, epsilon = tol);
    for i in 0..3 {
        assert_abs_diff_eq!(traj.states[(1 + i, 0)], lander.r_init[i], epsilon = tol);
        assert_abs_diff_eq!(traj.states[(4 + i, 0)], lander.v_init[i], epsilon = tol);
        assert_abs_diff_eq!(traj.states[(1 + i, 14)], lander.r_final[i], epsilon = tol);
        assert_abs_diff_eq!(traj.states[(4 + i, 14)], lander.v_final[i], epsilon = tol);
    }
    let cot = 1.0 / lander.glide_slope.tan();
    for k in 0..15 {
        assert!(traj.states[(0, k)] >= lander.dry_mass - tol);
        assert!(traj.inputs.column(k).norm() <= lander.thrust_max + tol);
        let r_xy = traj.states[(1, k)].hypot(traj.states[(2, k)]);
        assert!(r_xy <= traj.states[(3, k)] * cot + tol);
    }

    let report = format!("{}", sol.last_report().unwrap());
    assert!(report.starts_with("Iteration 5\nX\n"));
    assert!(report.contains("norm2_nu   "));
    assert!(report.contains("Delta_sigma   "));
}

#[test]
fn linearization_failure() {
    init_logger();
    let cfg = ScvxConfig::builder().nodes(4).iterations(3).build();
    let mut scvx = SuccessiveConvexification::with_clarabel(&Sheared, cfg.clone()).unwrap();
    let err = scvx.solve().unwrap_err();
    assert_eq!(err.iteration(), Some(1));
    assert!(matches!(
        err,
        ScvxError::LinearizationFailure {
            iteration: 1,
            interval: 0,
            source: PropagationError::Dynamics { .. }
        }
    ));
    assert_eq!(scvx.phase(), ScvxPhase::Terminated);

    // An overflowing model fails at the first interval instead of reaching the subproblem
    let mut scvx = SuccessiveConvexification::with_clarabel(&Overflowing, cfg).unwrap();
    let err = scvx.solve().unwrap_err();
    assert!(
        matches!(
            err,
            ScvxError::LinearizationFailure {
                iteration: 1,
                interval: 0,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(scvx.phase(), ScvxPhase::Terminated);
}

#[test]
fn infeasible_subproblem() {
    init_logger();
    let cfg = ScvxConfig::builder().nodes(3).iterations(2).build();
    let mut scvx = SuccessiveConvexification::with_clarabel(&Contradictory, cfg).unwrap();
    let err = scvx.solve().unwrap_err();
    assert!(
        matches!(err, ScvxError::SubproblemInfeasible { iteration: 1, .. }),
        "{err}"
    );
    assert_eq!(err.iteration(), Some(1));
    assert_eq!(scvx.phase(), ScvxPhase::Terminated);
}

#[test]
fn solver_numerical_failure() {
    init_logger();
    // The solver gives up long before it could converge
    let cfg = ScvxConfig::builder()
        .nodes(5)
        .iterations(2)
        .solver(SolverSettings::builder().max_iter(1).build())
        .build();
    let mut scvx = SuccessiveConvexification::with_clarabel(&QuadraticDrift, cfg).unwrap();
    let err = scvx.solve().unwrap_err();
    assert!(
        matches!(err, ScvxError::SolverNumericalError { iteration: 1, .. }),
        "{err}"
    );
    assert_eq!(err.iteration(), Some(1));
    assert_eq!(scvx.phase(), ScvxPhase::Terminated);
}

#[test]
fn invalid_inputs() {
    init_logger();
    assert!(matches!(
        SuccessiveConvexification::new(
            &QuadraticDrift,
            ScvxConfig::builder().nodes(1).build(),
            ClarabelSolver::default()
        ),
        Err(ScvxError::Configuration { .. })
    ));

    let cfg = ScvxConfig::builder().nodes(5).iterations(1).build();
    let mut scvx =
        SuccessiveConvexification::new(&QuadraticDrift, cfg, ClarabelSolver::default()).unwrap();
    let err = scvx
        .solve_from(Trajectory::zeros(1, 1, 6, 1.0))
        .unwrap_err();
    assert!(matches!(err, ScvxError::InitialGuess { .. }));
    assert_eq!(err.iteration(), None);

    let bad_lander = PointMassLander::builder().dry_mass(3.0).build();
    let mut scvx = SuccessiveConvexification::new(
        &bad_lander,
        ScvxConfig::builder().nodes(5).build(),
        ClarabelSolver::default(),
    )
    .unwrap();
    assert!(matches!(
        scvx.solve().unwrap_err(),
        ScvxError::InitialGuess { .. }
    ));
}

#[test]
fn config_from_file() {
    init_logger();
    let path = std::env::temp_dir().join("scvx_config_from_file.yaml");
    std::fs::write(
        &path,
        "nodes: 12\niterations: 4\ntrust_region_xu: false\nsolver:\n  max_iter: 100\n",
    )
    .unwrap();
    let cfg = ScvxConfig::load(&path).unwrap();
    assert_eq!(cfg.nodes, 12);
    assert_eq!(cfg.iterations, 4);
    assert!(!cfg.trust_region_xu);
    assert_eq!(cfg.solver.max_iter, 100);
    assert_eq!(cfg.termination, Termination::FixedIterations);

    // Runs without the state and control trust region
    let mut scvx =
        SuccessiveConvexification::new(&PinnedIntegrator { u: 1.0 }, cfg, ClarabelSolver::default())
            .unwrap();
    let sol = scvx.solve().unwrap();
    assert_eq!(sol.iterations.len(), 4);
    assert!(sol.iterations.iter().all(|r| r.delta_xu == 0.0));
    assert_abs_diff_eq!(sol.trajectory.sigma, 1.0, epsilon = 1e-6);

    assert!(ScvxConfig::load("/does/not/exist.yaml").is_err());
}
