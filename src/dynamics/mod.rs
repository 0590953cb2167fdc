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

use crate::linalg::{DMatrix, DVector};
use crate::md::opti::problem::{ProblemError, SocpProblem};
use crate::md::trajectory::Trajectory;
use snafu::Snafu;

/// Linear time invariant dynamics.
pub mod linear;
pub use self::linear::*;

/// Three degree of freedom powered descent of a point mass with fuel depletion.
pub mod lander;
pub use self::lander::*;

/// A trait for the vehicle model used by the successive convexification.
///
/// The equations of motion are autonomous and expressed in physical time: the discretization scales them by the
/// total flight time `sigma` to integrate over the normalized time. Beyond the equations of motion and their
/// Jacobians, the model also provides the initial guess of the trajectory and the mission specific constraints
/// (boundary conditions, state and input bounds, glide slope, etc.)
pub trait Dynamics: Sync + Send {
    /// Size of the state vector
    const N_STATES: usize;
    /// Size of the control vector
    const N_INPUTS: usize;

    /// Defines the equations of motion, i.e. the time derivative of the state.
    fn eom(&self, state: &DVector<f64>, control: &DVector<f64>)
        -> Result<DVector<f64>, DynamicsError>;

    /// Partial derivatives of the equations of motion with respect to the state, N_STATES x N_STATES.
    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError>;

    /// Partial derivatives of the equations of motion with respect to the control, N_STATES x N_INPUTS.
    fn control_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError>;

    /// Fills the states and controls of the provided trajectory with an initial guess. The total time is set separately from [Self::total_time_guess].
    fn initialize(&self, traj: &mut Trajectory) -> Result<(), DynamicsError>;

    /// Initial guess of the total flight time.
    fn total_time_guess(&self) -> f64;

    /// Adds the mission constraints and any additional objective terms to the convex subproblem.
    ///
    /// The subproblem declares the tensor variables `X` (N_STATES x nodes), `U` (N_INPUTS x nodes) and `sigma`
    /// before calling this function, and compiles its structure right after.
    fn add_application_constraints(
        &self,
        problem: &mut SocpProblem,
        nodes: usize,
    ) -> Result<(), ProblemError>;
}

/// Dynamical model errors.
#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DynamicsError {
    /// The state transition matrix cannot be inverted: the linearization cannot proceed.
    #[snafu(display("STM is singular at normalized time {t:.6} (rcond = {rcond:.3e})"))]
    SingularStateTransitionMatrix { t: f64, rcond: f64 },
    #[snafu(display("{what} is not finite"))]
    NonFiniteDerivative { what: &'static str },
    #[snafu(display("{what} is of size {got} but {expected} was expected"))]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[snafu(display("initial guess failed: {msg}"))]
    InitialGuessFailed { msg: String },
}
