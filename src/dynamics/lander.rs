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

use super::{DimensionMismatchSnafu, Dynamics, DynamicsError};
use crate::linalg::{DMatrix, DVector, Vector3};
use crate::md::opti::expr::Expr;
use crate::md::opti::problem::{ProblemError, SocpProblem};
use crate::md::opti::subproblem::{INPUTS, STATES};
use crate::md::trajectory::Trajectory;
use snafu::ensure;
use typed_builder::TypedBuilder;

/// Below this thrust norm, the mass flow is not differentiable and its Jacobian is taken as zero.
const THRUST_EPSILON: f64 = 1e-9;

/// Three degree of freedom powered descent of a point mass in a uniform gravity field, in non dimensional units.
///
/// The state is [m, r, v] with the altitude along +z, and the control is the thrust vector T:
///
/// m' = -α ||T||, r' = v, v' = T / m - g0 z
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
pub struct PointMassLander {
    #[builder(default = 1.0)]
    pub g0: f64,
    /// Fuel consumption per unit of thrust
    #[builder(default = 0.05)]
    pub alpha: f64,
    #[builder(default = 2.0)]
    pub wet_mass: f64,
    #[builder(default = 1.0)]
    pub dry_mass: f64,
    #[builder(default = 5.0)]
    pub thrust_max: f64,
    /// Glide slope angle, measured from the horizontal
    #[builder(default = 20.0_f64.to_radians())]
    pub glide_slope: f64,
    #[builder(default = Vector3::new(2.0, 2.0, 4.0))]
    pub r_init: Vector3<f64>,
    #[builder(default = Vector3::new(-0.5, 0.5, -1.0))]
    pub v_init: Vector3<f64>,
    #[builder(default = Vector3::zeros())]
    pub r_final: Vector3<f64>,
    #[builder(default = Vector3::new(0.0, 0.0, -0.1))]
    pub v_final: Vector3<f64>,
    #[builder(default = 5.0)]
    pub time_guess: f64,
}

impl Default for PointMassLander {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PointMassLander {
    fn gravity(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, -self.g0)
    }

    fn split(
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<(f64, Vector3<f64>, Vector3<f64>), DynamicsError> {
        ensure!(
            state.len() == Self::N_STATES,
            DimensionMismatchSnafu {
                what: "state",
                expected: Self::N_STATES,
                got: state.len()
            }
        );
        ensure!(
            control.len() == Self::N_INPUTS,
            DimensionMismatchSnafu {
                what: "control",
                expected: Self::N_INPUTS,
                got: control.len()
            }
        );
        let v = Vector3::new(state[4], state[5], state[6]);
        let thrust = Vector3::new(control[0], control[1], control[2]);
        Ok((state[0], v, thrust))
    }
}

impl Dynamics for PointMassLander {
    const N_STATES: usize = 7;
    const N_INPUTS: usize = 3;

    fn eom(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError> {
        let (m, v, thrust) = Self::split(state, control)?;
        let acc = thrust / m + self.gravity();
        Ok(DVector::from_column_slice(&[
            -self.alpha * thrust.norm(),
            v[0],
            v[1],
            v[2],
            acc[0],
            acc[1],
            acc[2],
        ]))
    }

    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        let (m, _, thrust) = Self::split(state, control)?;
        let mut jac = DMatrix::zeros(7, 7);
        for i in 0..3 {
            jac[(1 + i, 4 + i)] = 1.0;
            jac[(4 + i, 0)] = -thrust[i] / (m * m);
        }
        Ok(jac)
    }

    fn control_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        let (m, _, thrust) = Self::split(state, control)?;
        let mut jac = DMatrix::zeros(7, 3);
        let norm = thrust.norm();
        for i in 0..3 {
            if norm > THRUST_EPSILON {
                jac[(0, i)] = -self.alpha * thrust[i] / norm;
            }
            jac[(4 + i, i)] = 1.0 / m;
        }
        Ok(jac)
    }

    /// Mass decreasing linearly from wet to dry, position and velocity interpolated between the boundary conditions,
    /// and a thrust which compensates gravity.
    fn initialize(&self, traj: &mut Trajectory) -> Result<(), DynamicsError> {
        let nodes = traj.nodes();
        traj.check_dimensions(Self::N_STATES, Self::N_INPUTS, nodes)?;
        if self.dry_mass <= 0.0 || self.wet_mass < self.dry_mass {
            return Err(DynamicsError::InitialGuessFailed {
                msg: format!(
                    "invalid masses: wet {} and dry {}",
                    self.wet_mass, self.dry_mass
                ),
            });
        }
        for k in 0..nodes {
            let alpha2 = k as f64 / (nodes - 1) as f64;
            let alpha1 = 1.0 - alpha2;
            let m = alpha1 * self.wet_mass + alpha2 * self.dry_mass;
            let r = alpha1 * self.r_init + alpha2 * self.r_final;
            let v = alpha1 * self.v_init + alpha2 * self.v_final;
            let thrust = -m * self.gravity();
            traj.states.set_column(
                k,
                &DVector::from_column_slice(&[m, r[0], r[1], r[2], v[0], v[1], v[2]]),
            );
            traj.inputs
                .set_column(k, &DVector::from_column_slice(thrust.as_slice()));
        }
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        self.time_guess
    }

    fn add_application_constraints(
        &self,
        problem: &mut SocpProblem,
        nodes: usize,
    ) -> Result<(), ProblemError> {
        let x = problem.variable(STATES)?.clone();
        let u = problem.variable(INPUTS)?.clone();

        // Boundary conditions
        let x_init = [
            self.wet_mass,
            self.r_init[0],
            self.r_init[1],
            self.r_init[2],
            self.v_init[0],
            self.v_init[1],
            self.v_init[2],
        ];
        for (i, val) in x_init.iter().enumerate() {
            problem.add_equality_constraint(x.expr(&[i, 0])?.minus(Expr::constant(*val)))?;
        }
        for i in 0..3 {
            problem.add_equality_constraint(
                x.expr(&[1 + i, nodes - 1])?
                    .minus(Expr::constant(self.r_final[i])),
            )?;
            problem.add_equality_constraint(
                x.expr(&[4 + i, nodes - 1])?
                    .minus(Expr::constant(self.v_final[i])),
            )?;
        }

        let cot_glide_slope = 1.0 / self.glide_slope.tan();
        for k in 0..nodes {
            // m >= m_dry
            problem.add_inequality_constraint(
                x.expr(&[0, k])?.minus(Expr::constant(self.dry_mass)),
            )?;
            // ||T|| <= T_max
            problem.add_cone_constraint(
                vec![u.expr(&[0, k])?, u.expr(&[1, k])?, u.expr(&[2, k])?],
                Expr::constant(self.thrust_max),
            )?;
            // ||r_xy|| <= r_z / tan(γ)
            problem.add_cone_constraint(
                vec![x.expr(&[1, k])?, x.expr(&[2, k])?],
                x.expr(&[3, k])?.scaled(cot_glide_slope),
            )?;
        }
        Ok(())
    }
}
