/*
    Nyx, blazing fast astrodynamics
    Copyright (C) 2018-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use typed_builder::TypedBuilder;

use crate::dynamics::{
    DimensionMismatchSnafu, Dynamics, DynamicsError, NonFiniteDerivativeSnafu,
};
use crate::linalg::{DMatrix, DVector};
use crate::md::trajectory::Trajectory;
use crate::propagators::error_ctrl::{AbsRelError, ErrorCtrl};
use crate::propagators::{DynamicsSnafu, Ode, PropOpts, PropagationError, Propagator};
use crate::utils::try_invert_stm;

/// Settings of the adaptive integration of each interval.
///
/// The step sizes are given as fractions of the normalized interval width, e.g. the default initial step is a tenth of the interval.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct DiscretizationConfig {
    #[builder(default = 1e-4)]
    pub tolerance: f64,
    #[builder(default = 0.1)]
    pub init_step_fraction: f64,
    #[builder(default = 1e-6)]
    pub min_step_fraction: f64,
    #[builder(default = 50)]
    pub attempts: u8,
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DiscretizationConfig {
    /// Builds the propagator options for an interval of normalized width `dt`.
    pub fn prop_opts<E: ErrorCtrl>(&self, dt: f64, error_ctrl: E) -> PropOpts<E> {
        PropOpts::builder()
            .init_step(dt * self.init_step_fraction)
            .min_step(dt * self.min_step_fraction)
            .max_step(dt)
            .tolerance(self.tolerance)
            .attempts(self.attempts)
            .error_ctrl(error_ctrl)
            .build()
    }
}

/// Discrete time affine model of the dynamics over one interval:
///
/// x_{k+1} = A x_k + B u_k + C u_{k+1} + Σ σ + z
#[derive(Clone, Debug, PartialEq)]
pub struct AffineModel {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub sigma: DVector<f64>,
    pub z: DVector<f64>,
    /// State at the end of the interval propagated with the nonlinear dynamics
    pub propagated: DVector<f64>,
}

impl AffineModel {
    pub fn zeros(n_states: usize, n_inputs: usize) -> Self {
        Self {
            a: DMatrix::zeros(n_states, n_states),
            b: DMatrix::zeros(n_states, n_inputs),
            c: DMatrix::zeros(n_states, n_inputs),
            sigma: DVector::zeros(n_states),
            z: DVector::zeros(n_states),
            propagated: DVector::zeros(n_states),
        }
    }

    /// Evaluates the affine map at the provided state, bracketing controls and total time.
    pub fn apply(
        &self,
        state: &DVector<f64>,
        u_start: &DVector<f64>,
        u_end: &DVector<f64>,
        sigma: f64,
    ) -> DVector<f64> {
        &self.a * state + &self.b * u_start + &self.c * u_end + &self.sigma * sigma + &self.z
    }
}

impl fmt::Display for AffineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A = {}B = {}C = {}Σ = {}z = {}",
            self.a, self.b, self.c, self.sigma, self.z
        )
    }
}

/// Augmented sensitivity equations of one interval.
///
/// The augmented state is an N_STATES x (3 + N_STATES + 2 N_INPUTS) matrix whose columns are, in order: the state,
/// the state transition matrix Φ, the sensitivities to the starting control, to the ending control, to the total
/// time and to the bias. All sensitivities are premultiplied by Φ⁻¹ so that only a single integration is needed.
pub struct DiscretizationOde<'a, D: Dynamics> {
    pub dynamics: &'a D,
    pub u_start: DVector<f64>,
    pub u_end: DVector<f64>,
    pub sigma: f64,
    /// Width of the interval in normalized time
    pub dt: f64,
}

impl<'a, D: Dynamics> DiscretizationOde<'a, D> {
    pub fn new(
        dynamics: &'a D,
        u_start: DVector<f64>,
        u_end: DVector<f64>,
        sigma: f64,
        dt: f64,
    ) -> Self {
        Self {
            dynamics,
            u_start,
            u_end,
            sigma,
            dt,
        }
    }

    /// Number of columns of the augmented state
    pub fn augmented_columns() -> usize {
        3 + D::N_STATES + 2 * D::N_INPUTS
    }

    /// Returns the augmented state at the start of the interval: the state, an identity STM and zero sensitivities.
    pub fn initial_state(&self, x0: &DVector<f64>) -> DMatrix<f64> {
        let n = D::N_STATES;
        let mut aug = DMatrix::zeros(n, Self::augmented_columns());
        aug.set_column(0, x0);
        aug.view_mut((0, 1), (n, n)).fill_with_identity();
        aug
    }

    /// First order hold of the control at normalized time `t` within the interval.
    pub fn control(&self, t: f64) -> DVector<f64> {
        let alpha = t / self.dt;
        let beta = 1.0 - alpha;
        beta * &self.u_start + alpha * &self.u_end
    }

    /// Unpacks the augmented state at the end of the interval into the affine model.
    pub fn unpack(&self, aug: &DMatrix<f64>) -> AffineModel {
        let n = D::N_STATES;
        let m = D::N_INPUTS;
        let phi = aug.columns(1, n).into_owned();
        let b = &phi * aug.columns(1 + n, m);
        let c = &phi * aug.columns(1 + n + m, m);
        let sigma = &phi * aug.column(1 + n + 2 * m);
        let z = &phi * aug.column(2 + n + 2 * m);
        AffineModel {
            b,
            c,
            sigma,
            z,
            propagated: aug.column(0).into_owned(),
            a: phi,
        }
    }
}

impl<'a, D: Dynamics> Ode for DiscretizationOde<'a, D> {
    fn eom(&self, t: f64, aug: &DMatrix<f64>) -> Result<DMatrix<f64>, DynamicsError> {
        let n = D::N_STATES;
        let m = D::N_INPUTS;
        ensure!(
            aug.nrows() == n,
            DimensionMismatchSnafu {
                what: "augmented state rows",
                expected: n,
                got: aug.nrows()
            }
        );
        ensure!(
            aug.ncols() == Self::augmented_columns(),
            DimensionMismatchSnafu {
                what: "augmented state columns",
                expected: Self::augmented_columns(),
                got: aug.ncols()
            }
        );

        let alpha = t / self.dt;
        let beta = 1.0 - alpha;
        let x = aug.column(0).into_owned();
        let u = self.control(t);
        let phi = aug.columns(1, n).into_owned();

        let f = self.dynamics.eom(&x, &u)?;
        ensure!(
            f.len() == n,
            DimensionMismatchSnafu {
                what: "state derivative",
                expected: n,
                got: f.len()
            }
        );
        ensure!(
            f.iter().all(|v| v.is_finite()),
            NonFiniteDerivativeSnafu {
                what: "state derivative"
            }
        );

        let a_mat = self.sigma * self.dynamics.state_jacobian(&x, &u)?;
        let b_mat = self.sigma * self.dynamics.control_jacobian(&x, &u)?;
        ensure!(
            a_mat.shape() == (n, n),
            DimensionMismatchSnafu {
                what: "state jacobian",
                expected: n * n,
                got: a_mat.len()
            }
        );
        ensure!(
            b_mat.shape() == (n, m),
            DimensionMismatchSnafu {
                what: "control jacobian",
                expected: n * m,
                got: b_mat.len()
            }
        );
        ensure!(
            a_mat.iter().chain(b_mat.iter()).all(|v| v.is_finite()),
            NonFiniteDerivativeSnafu { what: "jacobians" }
        );

        let phi_inv = try_invert_stm(&phi, t)?;

        let mut d_aug = DMatrix::zeros(n, Self::augmented_columns());
        d_aug.set_column(0, &(self.sigma * &f));
        d_aug.columns_mut(1, n).copy_from(&(&a_mat * &phi));

        let phi_inv_b = &phi_inv * &b_mat;
        // u(t) = β u_start + α u_end
        d_aug.columns_mut(1 + n, m).copy_from(&(beta * &phi_inv_b));
        d_aug
            .columns_mut(1 + n + m, m)
            .copy_from(&(alpha * &phi_inv_b));
        d_aug.set_column(1 + n + 2 * m, &(&phi_inv * &f));
        d_aug.set_column(2 + n + 2 * m, &(&phi_inv * (-(&a_mat * &x) - &b_mat * &u)));
        ensure!(
            d_aug.iter().all(|v| v.is_finite()),
            NonFiniteDerivativeSnafu {
                what: "augmented state derivative"
            }
        );

        Ok(d_aug)
    }
}

/// Ensures that the augmented state at the end of an interval is finite and that its STM is invertible.
fn check_end_state(aug: &DMatrix<f64>, n: usize, dt: f64) -> Result<(), DynamicsError> {
    ensure!(
        aug.iter().all(|v| v.is_finite()),
        NonFiniteDerivativeSnafu {
            what: "augmented state"
        }
    );
    try_invert_stm(&aug.columns(1, n).into_owned(), dt)?;
    Ok(())
}

/// Computes the affine model of every interval of a reference trajectory.
pub struct Discretizer<'a, D: Dynamics, E: ErrorCtrl = AbsRelError> {
    pub dynamics: &'a D,
    pub cfg: DiscretizationConfig,
    pub error_ctrl: E,
    /// Integrate the intervals in parallel
    pub parallel: bool,
}

impl<'a, D: Dynamics> Discretizer<'a, D, AbsRelError> {
    pub fn new(dynamics: &'a D, cfg: DiscretizationConfig) -> Self {
        Self {
            dynamics,
            cfg,
            error_ctrl: AbsRelError,
            parallel: false,
        }
    }
}

impl<'a, D: Dynamics, E: ErrorCtrl> Discretizer<'a, D, E> {
    pub fn with_error_ctrl(dynamics: &'a D, cfg: DiscretizationConfig, error_ctrl: E) -> Self {
        Self {
            dynamics,
            cfg,
            error_ctrl,
            parallel: false,
        }
    }

    /// Sets whether the intervals are integrated in parallel.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Integrates a single interval of normalized width `dt` starting from state `x0`.
    ///
    /// Each call starts from a freshly initialized augmented state, so intervals are independent of each other.
    pub fn interval(
        &self,
        x0: &DVector<f64>,
        u_start: &DVector<f64>,
        u_end: &DVector<f64>,
        sigma: f64,
        dt: f64,
    ) -> Result<AffineModel, PropagationError> {
        let ode = DiscretizationOde::new(self.dynamics, u_start.clone(), u_end.clone(), sigma, dt);
        let init = ode.initial_state(x0);
        let opts = self.cfg.prop_opts(dt, self.error_ctrl);
        let prop = Propagator::dp45(ode, opts);
        let mut instance = prop.with(init, 0.0);
        let aug = instance.for_duration(dt)?;
        trace!(
            "interval integrated in {} steps with {} ({})",
            instance.steps,
            prop.opts,
            instance.latest_details()
        );
        // The last step is taken with a fixed size, so its result was never checked by the error control
        check_end_state(&aug, D::N_STATES, dt).context(DynamicsSnafu)?;
        Ok(prop.ode.unpack(&aug))
    }

    /// Computes the affine model of each of the K-1 intervals of the trajectory.
    pub fn discretize(&self, traj: &Trajectory) -> Result<Vec<AffineModel>, DiscretizationError> {
        let n = D::N_STATES;
        let m = D::N_INPUTS;
        traj.check_dimensions(n, m, traj.nodes())
            .context(DimensionsSnafu)?;
        ensure!(traj.nodes() >= 2, TooFewNodesSnafu { nodes: traj.nodes() });

        let dt = traj.dt();
        let sigma = traj.sigma;
        // Each interval writes into its own slot
        let mut models = vec![AffineModel::zeros(n, m); traj.nodes() - 1];
        let compute = |(k, slot): (usize, &mut AffineModel)| -> Result<(), DiscretizationError> {
            *slot = self
                .interval(&traj.state(k), &traj.input(k), &traj.input(k + 1), sigma, dt)
                .context(IntervalSnafu { interval: k })?;
            Ok(())
        };

        if self.parallel {
            models.par_iter_mut().enumerate().try_for_each(compute)?;
        } else {
            models.iter_mut().enumerate().try_for_each(compute)?;
        }

        for (k, model) in models.iter().enumerate() {
            debug!(
                "interval #{k}: defect {:.3e}",
                (&model.propagated - traj.state(k + 1)).norm()
            );
        }

        Ok(models)
    }
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DiscretizationError {
    #[snafu(display("interval #{interval}: {source}"))]
    Interval {
        interval: usize,
        source: PropagationError,
    },
    #[snafu(display("trajectory does not match the dynamics: {source}"))]
    Dimensions { source: DynamicsError },
    #[snafu(display("at least two nodes are needed, got {nodes}"))]
    TooFewNodes { nodes: usize },
}

#[cfg(test)]
mod ut_discretization {
    use super::*;
    use crate::md::opti::problem::{ProblemError, SocpProblem};
    use approx::assert_abs_diff_eq;

    /// x' = u, scalar
    struct Integrator;

    impl Dynamics for Integrator {
        const N_STATES: usize = 1;
        const N_INPUTS: usize = 1;

        fn eom(
            &self,
            _state: &DVector<f64>,
            control: &DVector<f64>,
        ) -> Result<DVector<f64>, DynamicsError> {
            Ok(control.clone())
        }

        fn state_jacobian(
            &self,
            _state: &DVector<f64>,
            _control: &DVector<f64>,
        ) -> Result<DMatrix<f64>, DynamicsError> {
            Ok(DMatrix::zeros(1, 1))
        }

        fn control_jacobian(
            &self,
            _state: &DVector<f64>,
            _control: &DVector<f64>,
        ) -> Result<DMatrix<f64>, DynamicsError> {
            Ok(DMatrix::identity(1, 1))
        }

        fn initialize(&self, _traj: &mut Trajectory) -> Result<(), DynamicsError> {
            Ok(())
        }

        fn total_time_guess(&self) -> f64 {
            1.0
        }

        fn add_application_constraints(
            &self,
            _problem: &mut SocpProblem,
            _nodes: usize,
        ) -> Result<(), ProblemError> {
            Ok(())
        }
    }

    #[test]
    fn first_order_hold() {
        let disc = Discretizer::new(&Integrator, DiscretizationConfig::default());
        let model = disc
            .interval(
                &DVector::from_element(1, 0.0),
                &DVector::from_element(1, 1.0),
                &DVector::from_element(1, 3.0),
                2.0,
                0.5,
            )
            .unwrap();
        // x(dt) = σ dt (u0 + u1) / 2
        assert_abs_diff_eq!(model.propagated[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.a[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.b[(0, 0)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(model.c[(0, 0)], 0.5, epsilon = 1e-12);
        // Σ = ∫ f = dt (u0 + u1) / 2 and z cancels the σ Σ term for linear dynamics
        assert_abs_diff_eq!(model.sigma[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.z[0], -2.0, epsilon = 1e-12);
        let x1 = model.apply(
            &DVector::from_element(1, 0.0),
            &DVector::from_element(1, 1.0),
            &DVector::from_element(1, 3.0),
            2.0,
        );
        assert_abs_diff_eq!(x1[0], model.propagated[0], epsilon = 1e-12);
    }

    #[test]
    fn ramp_control_weighting() {
        // Only the ending control is non zero: x(dt) = σ dt u1 / 2 must be carried by C alone.
        let disc = Discretizer::new(&Integrator, DiscretizationConfig::default());
        let model = disc
            .interval(
                &DVector::from_element(1, 0.0),
                &DVector::from_element(1, 0.0),
                &DVector::from_element(1, 4.0),
                1.0,
                1.0,
            )
            .unwrap();
        assert_abs_diff_eq!(model.propagated[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.c[(0, 0)] * 4.0, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn discretize_trajectory() {
        let mut traj = Trajectory::zeros(1, 1, 5, 1.0);
        traj.inputs.fill(1.0);
        for k in 0..5 {
            traj.states[(0, k)] = 0.25 * k as f64;
        }
        let disc = Discretizer::new(&Integrator, DiscretizationConfig::default());
        let models = disc.discretize(&traj).unwrap();
        assert_eq!(models.len(), 4);
        let par_models = Discretizer::new(&Integrator, DiscretizationConfig::default())
            .parallel(true)
            .discretize(&traj)
            .unwrap();
        assert_eq!(models, par_models);
        for (k, model) in models.iter().enumerate() {
            assert_abs_diff_eq!(model.propagated[0], traj.states[(0, k + 1)], epsilon = 1e-12);
        }
    }

    #[test]
    fn wrong_dimensions() {
        let traj = Trajectory::zeros(2, 1, 5, 1.0);
        let disc = Discretizer::new(&Integrator, DiscretizationConfig::default());
        assert!(matches!(
            disc.discretize(&traj),
            Err(DiscretizationError::Dimensions { .. })
        ));
    }

    #[test]
    fn end_state_checks() {
        // [x, phi, B, C, sigma, z] for two states and one input
        let mut aug = DMatrix::zeros(2, 7);
        aug.columns_mut(1, 2).fill_with_identity();
        assert!(check_end_state(&aug, 2, 0.5).is_ok());

        aug[(1, 4)] = f64::NAN;
        assert_eq!(
            check_end_state(&aug, 2, 0.5),
            Err(DynamicsError::NonFiniteDerivative {
                what: "augmented state"
            })
        );

        aug[(1, 4)] = 0.0;
        aug[(0, 2)] = 1e13;
        match check_end_state(&aug, 2, 0.5) {
            Err(DynamicsError::SingularStateTransitionMatrix { t, rcond }) => {
                assert_eq!(t, 0.5);
                assert!(rcond < 1e-12);
            }
            other => panic!("expected a singular STM, got {other:?}"),
        }
    }
}
