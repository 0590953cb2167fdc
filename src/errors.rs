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

use snafu::prelude::*;

use crate::dynamics::DynamicsError;
use crate::io::ConfigError;
use crate::md::discretization::DiscretizationError;
use crate::md::opti::problem::ProblemError;
use crate::propagators::PropagationError;

/// Errors of the successive convexification.
///
/// Every failure which happens during an outer iteration carries the number of that iteration so that the
/// run never terminates with a trajectory which silently differs from what was requested.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ScvxError {
    /// The augmented integration of an interval produced a singular or degenerate state transition matrix.
    #[snafu(display("iteration #{iteration}: linearization of interval #{interval} failed: {source}"))]
    LinearizationFailure {
        iteration: usize,
        interval: usize,
        source: PropagationError,
    },
    /// The reference trajectory could not be discretized for a reason other than a failed interval.
    #[snafu(display("iteration #{iteration}: {source}"))]
    Discretization {
        iteration: usize,
        source: DiscretizationError,
    },
    /// The conic solver reports that the convex subproblem is infeasible, despite the virtual control.
    #[snafu(display("iteration #{iteration}: convex subproblem is infeasible ({detail})"))]
    SubproblemInfeasible { iteration: usize, detail: String },
    /// The conic solver ran into numerical trouble (ill conditioning, maximum iterations, etc.)
    #[snafu(display("iteration #{iteration}: conic solver numerical error ({detail})"))]
    SolverNumericalError { iteration: usize, detail: String },
    /// The subproblem could not be refreshed, or the conic solver could not even be set up.
    #[snafu(display("iteration #{iteration}: {source}"))]
    Subproblem {
        iteration: usize,
        source: ProblemError,
    },
    #[snafu(display("could not set up the convex subproblem: {source}"))]
    SubproblemSetup { source: ProblemError },
    #[snafu(display("could not build the initial guess: {source}"))]
    InitialGuess { source: DynamicsError },
    #[snafu(display("invalid successive convexification configuration: {source}"))]
    Configuration { source: ConfigError },
}

impl ScvxError {
    /// Returns the outer iteration during which this error happened, if it happened during an iteration.
    pub fn iteration(&self) -> Option<usize> {
        match self {
            Self::LinearizationFailure { iteration, .. }
            | Self::SubproblemInfeasible { iteration, .. }
            | Self::SolverNumericalError { iteration, .. }
            | Self::Discretization { iteration, .. }
            | Self::Subproblem { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }
}
