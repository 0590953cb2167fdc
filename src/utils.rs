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

use crate::dynamics::DynamicsError;
use crate::linalg::DMatrix;

/// Reciprocal condition number under which a state transition matrix is deemed singular.
pub const RCOND_SINGULAR: f64 = 1e-12;

/// Returns the induced 1-norm of the matrix, i.e. its largest absolute column sum.
pub fn norm_one(m: &DMatrix<f64>) -> f64 {
    m.column_iter()
        .map(|col| col.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Inverts the state transition matrix `phi` evaluated at normalized time `t`.
///
/// Fails with `SingularStateTransitionMatrix` if `phi` has non-finite entries, if the LU decomposition cannot
/// be inverted, or if the reciprocal condition number estimated in the 1-norm is below [RCOND_SINGULAR].
/// NaNs are never returned.
pub fn try_invert_stm(phi: &DMatrix<f64>, t: f64) -> Result<DMatrix<f64>, DynamicsError> {
    let maybe_inv = if phi.iter().all(|v| v.is_finite()) {
        phi.clone().lu().try_inverse()
    } else {
        None
    };

    match maybe_inv {
        Some(inv) if inv.iter().all(|v| v.is_finite()) => {
            let rcond = 1.0 / (norm_one(phi) * norm_one(&inv));
            if rcond < RCOND_SINGULAR || !rcond.is_finite() {
                Err(DynamicsError::SingularStateTransitionMatrix { t, rcond })
            } else {
                Ok(inv)
            }
        }
        _ => Err(DynamicsError::SingularStateTransitionMatrix { t, rcond: 0.0 }),
    }
}
