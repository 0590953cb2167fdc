use crate::init_logger;
use crate::models::{Overflowing, QuadraticDrift, Sheared, Static};
use approx::assert_abs_diff_eq;
use rstest::*;
use scvx::dynamics::{Dynamics, DynamicsError, LinearDynamics, PointMassLander};
use scvx::linalg::{DMatrix, DVector, Matrix2, SMatrix, Vector2};
use scvx::md::discretization::{DiscretizationConfig, DiscretizationError, Discretizer};
use scvx::propagators::PropagationError;
use scvx::Trajectory;

fn double_integrator() -> LinearDynamics<2, 1> {
    LinearDynamics::new(
        Matrix2::new(0.0, 1.0, 0.0, 0.0),
        SMatrix::<f64, 2, 1>::new(0.0, 1.0),
        Vector2::zeros(),
        Vector2::new(1.0, 0.0),
        1.0,
    )
}

fn oscillator() -> LinearDynamics<2, 1> {
    LinearDynamics::new(
        Matrix2::new(0.0, 1.0, -1.0, 0.0),
        SMatrix::<f64, 2, 1>::new(0.0, 1.0),
        Vector2::zeros(),
        Vector2::new(1.0, 0.0),
        1.0,
    )
}

fn vec1(v: f64) -> DVector<f64> {
    DVector::from_element(1, v)
}

#[rstest]
#[case(0.5, 1.0)]
#[case(0.1, 7.5)]
#[case(1.0, 0.01)]
fn static_dynamics(#[case] dt: f64, #[case] sigma: f64) {
    init_logger();
    let disc = Discretizer::new(&Static, DiscretizationConfig::default());
    let model = disc
        .interval(
            &DVector::from_column_slice(&[1.0, -2.0]),
            &vec1(3.0),
            &vec1(-4.0),
            sigma,
            dt,
        )
        .unwrap();
    assert_eq!(model.a, DMatrix::identity(2, 2));
    assert_eq!(model.b, DMatrix::zeros(2, 1));
    assert_eq!(model.c, DMatrix::zeros(2, 1));
    assert_eq!(model.sigma, DVector::zeros(2));
    assert_eq!(model.z, DVector::zeros(2));
    assert_eq!(model.propagated, DVector::from_column_slice(&[1.0, -2.0]));
}

#[rstest]
#[case(0.25, 2.0)]
#[case(0.1, 5.0)]
fn double_integrator_is_exact(#[case] dt: f64, #[case] sigma: f64) {
    init_logger();
    let dynamics = double_integrator();
    let disc = Discretizer::new(&dynamics, DiscretizationConfig::default());
    let model = disc
        .interval(&DVector::zeros(2), &vec1(1.0), &vec1(1.0), sigma, dt)
        .unwrap();
    // exp(σ A dt) = [[1, σ dt], [0, 1]]
    let h = sigma * dt;
    assert_abs_diff_eq!(model.a, DMatrix::from_row_slice(2, 2, &[1.0, h, 0.0, 1.0]), epsilon = 1e-10);
    // With a first order hold: B = [h²/3, h/2] and C = [h²/6, h/2]
    assert_abs_diff_eq!(model.b, DMatrix::from_column_slice(2, 1, &[h * h / 3.0, h / 2.0]), epsilon = 1e-10);
    assert_abs_diff_eq!(model.c, DMatrix::from_column_slice(2, 1, &[h * h / 6.0, h / 2.0]), epsilon = 1e-10);
}

#[rstest]
#[case(0.25, 2.0)]
#[case(0.02, 10.0)]
#[case(1.0, 1.5)]
fn oscillator_matches_matrix_exponential(#[case] dt: f64, #[case] sigma: f64) {
    init_logger();
    let dynamics = oscillator();
    let theta = sigma * dt;
    let expected = DMatrix::from_row_slice(
        2,
        2,
        &[theta.cos(), theta.sin(), -theta.sin(), theta.cos()],
    );

    let disc = Discretizer::new(&dynamics, DiscretizationConfig::default());
    let model = disc
        .interval(
            &DVector::from_column_slice(&[1.0, 0.0]),
            &vec1(0.0),
            &vec1(0.0),
            sigma,
            dt,
        )
        .unwrap();
    assert_abs_diff_eq!(model.a, expected, epsilon = 5e-4);

    // Independent of the step sizes picked by the integrator
    let fine = Discretizer::new(
        &dynamics,
        DiscretizationConfig::builder()
            .tolerance(1e-12)
            .init_step_fraction(0.001)
            .build(),
    );
    let fine_model = fine
        .interval(
            &DVector::from_column_slice(&[1.0, 0.0]),
            &vec1(0.0),
            &vec1(0.0),
            sigma,
            dt,
        )
        .unwrap();
    assert_abs_diff_eq!(fine_model.a, expected, epsilon = 1e-8);
    assert_abs_diff_eq!(model.a, fine_model.a, epsilon = 5e-4);
}

#[test]
fn affine_model_reproduces_propagation() {
    init_logger();
    let lander = PointMassLander::default();
    let mut traj = Trajectory::zeros(7, 3, 10, lander.total_time_guess());
    lander.initialize(&mut traj).unwrap();

    let cfg = DiscretizationConfig::builder().tolerance(1e-10).build();
    let models = Discretizer::new(&lander, cfg).discretize(&traj).unwrap();
    assert_eq!(models.len(), 9);
    for (k, model) in models.iter().enumerate() {
        let x1 = model.apply(&traj.state(k), &traj.input(k), &traj.input(k + 1), traj.sigma);
        assert_abs_diff_eq!(x1, model.propagated, epsilon = 1e-7);
    }

    let drift_traj = {
        let mut t = Trajectory::zeros(1, 1, 5, 1.5);
        QuadraticDrift.initialize(&mut t).unwrap();
        t
    };
    let models = Discretizer::new(&QuadraticDrift, cfg)
        .discretize(&drift_traj)
        .unwrap();
    for (k, model) in models.iter().enumerate() {
        let x1 = model.apply(
            &drift_traj.state(k),
            &drift_traj.input(k),
            &drift_traj.input(k + 1),
            drift_traj.sigma,
        );
        assert_abs_diff_eq!(x1, model.propagated, epsilon = 1e-7);
    }
}

#[test]
fn parallel_matches_sequential() {
    init_logger();
    let lander = PointMassLander::default();
    let mut traj = Trajectory::zeros(7, 3, 20, lander.total_time_guess());
    lander.initialize(&mut traj).unwrap();

    let sequential = Discretizer::new(&lander, DiscretizationConfig::default())
        .discretize(&traj)
        .unwrap();
    let parallel = Discretizer::new(&lander, DiscretizationConfig::default())
        .parallel(true)
        .discretize(&traj)
        .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn singular_stm() {
    init_logger();
    let traj = Trajectory::zeros(2, 1, 4, 1.0);
    let err = Discretizer::new(&Sheared, DiscretizationConfig::default())
        .discretize(&traj)
        .unwrap_err();
    match err {
        DiscretizationError::Interval {
            interval,
            source:
                PropagationError::Dynamics {
                    source: DynamicsError::SingularStateTransitionMatrix { t, rcond },
                },
        } => {
            assert_eq!(interval, 0);
            assert!(t > 0.0 && t < traj.dt());
            assert!(rcond > 0.0 && rcond < 1e-12);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[rstest]
#[case(false)]
#[case(true)]
fn overflowing_derivative(#[case] parallel: bool) {
    init_logger();
    // sigma * f = 2e308 is not representable
    let traj = Trajectory::zeros(1, 1, 3, Overflowing.total_time_guess());
    let err = Discretizer::new(&Overflowing, DiscretizationConfig::default())
        .parallel(parallel)
        .discretize(&traj)
        .unwrap_err();
    match err {
        DiscretizationError::Interval {
            source:
                PropagationError::Dynamics {
                    source: DynamicsError::NonFiniteDerivative { .. },
                },
            ..
        } => {}
        other => panic!("unexpected error {other}"),
    }
}
