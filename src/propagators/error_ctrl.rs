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

use crate::linalg::DMatrix;

/// The Error Control trait manages how a propagator computes the error in the current step.
pub trait ErrorCtrl
where
    Self: Copy + Send + Sync,
{
    /// Computes the actual error of the current step.
    ///
    /// The `error_est` is the estimated error computed from the difference in the two stages of
    /// of the RK propagator. The `candidate` variable is the candidate state, and `cur_state` is
    /// the current state. This function must return the error.
    fn estimate(error_est: &DMatrix<f64>, candidate: &DMatrix<f64>, cur_state: &DMatrix<f64>)
        -> f64;
}

/// An error control where the absolute and the relative tolerances are equal: each component is scaled by one plus
/// its magnitude, and the largest scaled error is returned.
///
/// With a tolerance `tol`, a step is accepted when every |e_i| <= tol + tol * |y_i|.
/// This is the default error control of the discretization.
#[derive(Clone, Copy, Debug, Default)]
pub struct AbsRelError;
impl ErrorCtrl for AbsRelError {
    fn estimate(
        error_est: &DMatrix<f64>,
        candidate: &DMatrix<f64>,
        cur_state: &DMatrix<f64>,
    ) -> f64 {
        let mut max_err = 0.0;
        for ((err_i, cand_i), cur_i) in error_est
            .iter()
            .zip(candidate.iter())
            .zip(cur_state.iter())
        {
            let err = err_i.abs() / (1.0 + cand_i.abs().max(cur_i.abs()));
            if err > max_err || err.is_nan() {
                max_err = err;
            }
        }
        max_err
    }
}
