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

/*! # scvx

Free-final-time powered descent guidance by successive convexification.

The nonlinear equations of motion of the vehicle are repeatedly linearized about a reference trajectory,
discretized exactly over each interval between nodes, and the resulting second-order cone program is solved
to produce the next reference. The total flight time is one of the optimization variables.

Reference: M. Szmuk, B. Açıkmeşe, "Successive Convexification for 6-DoF Mars Rocket Powered Landing with Free-Final-Time", 2018.
*/

/// Provides the adaptive Runge Kutta integrators used to discretize the dynamics.
pub mod propagators;

/// Provides the dynamics trait which any vehicle model must implement, and a few reference models.
pub mod dynamics;

/// Trajectory, discretization, and the successive convexification itself.
pub mod md;

/// Configuration loading.
pub mod io;

/// Utility functions shared by different modules.
pub mod utils;

mod errors;
/// Functions which may fail will return an error, and the successive convexification will never panic.
pub use self::errors::ScvxError;

#[macro_use]
extern crate log;
extern crate nalgebra as na;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

/// Re-export nalgebra
pub mod linalg {
    pub use na::base::*;
}

pub use self::md::opti::scvx::{ScvxConfig, ScvxSolution, SuccessiveConvexification};
pub use self::md::trajectory::Trajectory;
