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

/// Explicit affine expressions of decision variables and parameters.
pub mod expr;
/// Second order cone programs declared once and refreshed at each solve.
pub mod problem;
/// The conic solver interface and its Clarabel implementation.
pub mod solver;
/// The convex subproblem solved at each iteration and its trust regions.
pub mod subproblem;
/// The successive convexification loop.
pub mod scvx;
