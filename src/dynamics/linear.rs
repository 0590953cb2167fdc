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
use crate::linalg::{DMatrix, DVector, SMatrix, SVector};
use crate::md::opti::expr::Expr;
use crate::md::opti::problem::{ProblemError, SocpProblem};
use crate::md::opti::subproblem::{INPUTS, STATES};
use crate::md::trajectory::Trajectory;
use snafu::ensure;

/// Linear time invariant dynamics x' = A x + B u, from a fixed initial state to a fixed final state.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearDynamics<const N: usize, const M: usize> {
    pub a: SMatrix<f64, N, N>,
    pub b: SMatrix<f64, N, M>,
    pub x_init: SVector<f64, N>,
    pub x_final: SVector<f64, N>,
    pub time_guess: f64,
    /// Optional bound on the norm of the control at each node
    pub u_max: Option<f64>,
}

impl<const N: usize, const M: usize> LinearDynamics<N, M> {
    pub fn new(
        a: SMatrix<f64, N, N>,
        b: SMatrix<f64, N, M>,
        x_init: SVector<f64, N>,
        x_final: SVector<f64, N>,
        time_guess: f64,
    ) -> Self {
        Self {
            a,
            b,
            x_init,
            x_final,
            time_guess,
            u_max: None,
        }
    }

    /// Bounds the norm of the control at each node.
    pub fn with_input_bound(mut self, u_max: f64) -> Self {
        self.u_max = Some(u_max);
        self
    }

    fn check_sizes(state: &DVector<f64>, control: &DVector<f64>) -> Result<(), DynamicsError> {
        ensure!(
            state.len() == N,
            DimensionMismatchSnafu {
                what: "state",
                expected: N,
                got: state.len()
            }
        );
        ensure!(
            control.len() == M,
            DimensionMismatchSnafu {
                what: "control",
                expected: M,
                got: control.len()
            }
        );
        Ok(())
    }
}

impl<const N: usize, const M: usize> Dynamics for LinearDynamics<N, M> {
    const N_STATES: usize = N;
    const N_INPUTS: usize = M;

    fn eom(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError> {
        Self::check_sizes(state, control)?;
        let x = SVector::<f64, N>::from_column_slice(state.as_slice());
        let u = SVector::<f64, M>::from_column_slice(control.as_slice());
        let dx = self.a * x + self.b * u;
        Ok(DVector::from_column_slice(dx.as_slice()))
    }

    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Self::check_sizes(state, control)?;
        Ok(DMatrix::from_column_slice(N, N, self.a.as_slice()))
    }

    fn control_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Self::check_sizes(state, control)?;
        Ok(DMatrix::from_column_slice(N, M, self.b.as_slice()))
    }

    /// Straight line from the initial to the final state with zero control.
    fn initialize(&self, traj: &mut Trajectory) -> Result<(), DynamicsError> {
        let nodes = traj.nodes();
        traj.check_dimensions(N, M, nodes)?;
        for k in 0..nodes {
            let alpha = k as f64 / (nodes - 1) as f64;
            let x = (1.0 - alpha) * self.x_init + alpha * self.x_final;
            traj.states.set_column(k, &DVector::from_column_slice(x.as_slice()));
        }
        traj.inputs.fill(0.0);
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
        for i in 0..N {
            problem.add_equality_constraint(
                x.expr(&[i, 0])?.minus(Expr::constant(self.x_init[i])),
            )?;
            problem.add_equality_constraint(
                x.expr(&[i, nodes - 1])?
                    .minus(Expr::constant(self.x_final[i])),
            )?;
        }
        if let Some(u_max) = self.u_max {
            for k in 0..nodes {
                let args = (0..M)
                    .map(|i| u.expr(&[i, k]))
                    .collect::<Result<Vec<_>, _>>()?;
                problem.add_cone_constraint(args, Expr::constant(u_max))?;
            }
        }
        Ok(())
    }
}
