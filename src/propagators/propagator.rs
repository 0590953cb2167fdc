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

use super::error_ctrl::ErrorCtrl;
use super::{Dormand45, IntegrationDetails, Ode, PropInstance, PropOpts, RK};
use crate::linalg::DMatrix;

/// A Propagator allows propagating a set of dynamics forward in time.
/// It includes the options and the set of coefficients used for the monomorphic instance.
#[derive(Clone)]
pub struct Propagator<O: Ode, E: ErrorCtrl> {
    pub ode: O, // Stores the dynamics used. *Must* use this to get the latest values
    pub opts: PropOpts<E>, // Stores the integration options (tolerance, min/max step, init step, etc.)
    pub(crate) order: u8,    // Order of the integrator
    pub(crate) stages: usize, // Number of stages, i.e. how many times the derivatives will be called
    pub(crate) a_coeffs: &'static [f64],
    pub(crate) b_coeffs: &'static [f64],
}

impl<O: Ode, E: ErrorCtrl> Propagator<O, E> {
    /// Each propagator must be initialized with `new` which stores propagator information.
    pub fn new<T: RK>(ode: O, opts: PropOpts<E>) -> Self {
        Self {
            ode,
            opts,
            stages: T::STAGES,
            order: T::ORDER,
            a_coeffs: T::A_COEFFS,
            b_coeffs: T::B_COEFFS,
        }
    }

    /// A Dormand Prince 4-5 propagator with custom propagator options.
    pub fn dp45(ode: O, opts: PropOpts<E>) -> Self {
        Self::new::<Dormand45>(ode, opts)
    }

    /// Initializes a propagator instance starting from `state` at time `t`.
    pub fn with(&self, state: DMatrix<f64>, t: f64) -> PropInstance<'_, O, E> {
        // Pre-allocate the k used in the propagator
        let (nrows, ncols) = state.shape();
        let k = (0..self.stages)
            .map(|_| DMatrix::zeros(nrows, ncols))
            .collect();
        PropInstance {
            state,
            t,
            prop: self,
            details: IntegrationDetails {
                step: self.opts.init_step,
                error: 0.0,
                attempts: 1,
            },
            steps: 0,
            step_size: self.opts.init_step,
            fixed_step: self.opts.fixed_step,
            k,
        }
    }
}
