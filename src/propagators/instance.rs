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

use super::error_ctrl::ErrorCtrl;
use super::{
    DynamicsSnafu, IntegrationDetails, InvalidDurationSnafu, NonFiniteStateSnafu, Ode,
    PropagationError, Propagator,
};
use crate::linalg::DMatrix;
use std::f64;

/// A propagator instance stores the state being propagated, along with the adapted step size and the details
/// of the latest integration step.
pub struct PropInstance<'a, O: Ode, E: ErrorCtrl> {
    /// The state of this propagator instance
    pub state: DMatrix<f64>,
    /// The time of the state
    pub t: f64,
    /// The propagator setup (kind, stages, etc.)
    pub prop: &'a Propagator<O, E>,
    /// Stores the details of the previous integration step
    pub details: IntegrationDetails,
    /// Number of steps taken by this instance
    pub steps: usize,
    pub(crate) step_size: f64, // Stores the adapted step for the _next_ call
    pub(crate) fixed_step: bool,
    // Allows us to do pre-allocation of the ki vectors
    pub(crate) k: Vec<DMatrix<f64>>,
}

impl<'a, O: Ode, E: ErrorCtrl> PropInstance<'a, O, E> {
    /// Allows setting the step size of the propagator
    pub fn set_step(&mut self, step_size: f64, fixed: bool) {
        self.step_size = step_size;
        self.fixed_step = fixed;
    }

    /// This method propagates the provided dynamics for the provided duration and returns the final state.
    pub fn for_duration(&mut self, duration: f64) -> Result<DMatrix<f64>, PropagationError> {
        ensure!(
            duration.is_finite() && duration >= 0.0,
            InvalidDurationSnafu { duration }
        );
        if duration == 0.0 {
            return Ok(self.state.clone());
        }
        let stop_time = self.t + duration;

        loop {
            if self.t + self.step_size >= stop_time {
                if stop_time == self.t {
                    // No propagation necessary
                    return Ok(self.state.clone());
                }
                // Take one final step of exactly the needed duration until the stop time
                let prev_step_size = self.step_size;
                let prev_step_kind = self.fixed_step;
                self.set_step(stop_time - self.t, true);

                self.single_step()?;
                // Land exactly on the stop time regardless of rounding
                self.t = stop_time;

                // Restore the step size for subsequent calls
                self.set_step(prev_step_size, prev_step_kind);

                return Ok(self.state.clone());
            } else {
                self.single_step()?;
            }
        }
    }

    /// Take a single propagator step
    pub fn single_step(&mut self) -> Result<(), PropagationError> {
        let (step, next_state) = self.derive()?;
        self.state = next_state;
        self.t += step;
        self.steps += 1;

        Ok(())
    }

    /// This method integrates whichever function is provided as the ODE.
    ///
    /// This function returns the step sized used and the new state as y_{n+1} = y_n + \frac{dy_n}{dt}.
    /// To get the integration details, check `self.latest_details`.
    fn derive(&mut self) -> Result<(f64, DMatrix<f64>), PropagationError> {
        let state = &self.state;
        let (nrows, ncols) = state.shape();
        // Reset the number of attempts used (we don't reset the error because it's set before it's read)
        self.details.attempts = 1;
        // It's mutable because we may change it below
        let mut step_size = self.step_size;
        loop {
            let ki = self.prop.ode.eom(self.t, state).context(DynamicsSnafu)?;
            self.k[0] = ki;
            let mut a_idx: usize = 0;
            for i in 0..(self.prop.stages - 1) {
                // Let's compute the c_i by summing the relevant items from the list of coefficients.
                // \sum_{j=1}^{i-1} a_ij  ∀ i ∈ [2, s]
                let mut ci: f64 = 0.0;
                // The wi stores the a_{s1} * k_1 + a_{s2} * k_2 + ... + a_{s, s-1} * k_{s-1} +
                let mut wi = DMatrix::<f64>::zeros(nrows, ncols);
                for kj in &self.k[0..i + 1] {
                    let a_ij = self.prop.a_coeffs[a_idx];
                    ci += a_ij;
                    wi += a_ij * kj;
                    a_idx += 1;
                }

                let ki = self
                    .prop
                    .ode
                    .eom(self.t + ci * step_size, &(state + step_size * wi))
                    .context(DynamicsSnafu)?;
                self.k[i + 1] = ki;
            }
            // Compute the next state and the error
            let mut next_state = state.clone();
            // State error estimation from https://en.wikipedia.org/wiki/Runge%E2%80%93Kutta_methods#Adaptive_Runge%E2%80%93Kutta_methods
            // This is consistent with GMAT https://github.com/ChristopherRabotin/GMAT/blob/37201a6290e7f7b941bc98ee973a527a5857104b/src/base/propagator/RungeKutta.cpp#L537
            let mut error_est = DMatrix::<f64>::zeros(nrows, ncols);
            for (i, ki) in self.k.iter().enumerate() {
                let b_i = self.prop.b_coeffs[i];
                if !self.fixed_step {
                    let b_i_star = self.prop.b_coeffs[i + self.prop.stages];
                    error_est += step_size * (b_i - b_i_star) * ki;
                }
                next_state += step_size * b_i * ki;
            }
            // No step size can recover from an overflow
            ensure!(
                next_state.iter().all(|v| v.is_finite()),
                NonFiniteStateSnafu { t: self.t }
            );

            if self.fixed_step {
                // Using a fixed step, no adaptive step necessary
                self.details.step = step_size;
                return Ok((step_size, next_state));
            } else {
                // Compute the error estimate.
                self.details.error = E::estimate(&error_est, &next_state, state);
                if self.details.error <= self.prop.opts.tolerance
                    || step_size <= self.prop.opts.min_step
                    || self.details.attempts >= self.prop.opts.attempts
                {
                    if self.details.attempts >= self.prop.opts.attempts {
                        warn!(
                            "Could not further decrease step size: maximum number of attempts reached ({})",
                            self.details.attempts
                        );
                    }

                    self.details.step = step_size;
                    if self.details.error < self.prop.opts.tolerance {
                        // Error is less than tolerance, let's attempt to increase the step for the next iteration.
                        let proposed_step = 0.9
                            * step_size
                            * (self.prop.opts.tolerance / self.details.error)
                                .powf(1.0 / f64::from(self.prop.order));
                        step_size = if proposed_step > self.prop.opts.max_step {
                            self.prop.opts.max_step
                        } else {
                            proposed_step
                        };
                    }
                    // In all cases, let's update the step size to whatever was the adapted step size
                    self.step_size = step_size;
                    return Ok((self.details.step, next_state));
                } else {
                    // Error is too high and we aren't using the smallest step, and we haven't hit the max number of attempts.
                    // So let's adapt the step size.
                    self.details.attempts += 1;
                    let proposed_step = 0.9
                        * step_size
                        * (self.prop.opts.tolerance / self.details.error)
                            .powf(1.0 / f64::from(self.prop.order - 1));
                    step_size = if proposed_step < self.prop.opts.min_step || proposed_step.is_nan() {
                        self.prop.opts.min_step
                    } else {
                        proposed_step
                    };
                    // Note that we don't set self.step_size, that will be updated right before we return
                }
            }
        }
    }

    /// Copy the details of the latest integration step.
    pub fn latest_details(&self) -> IntegrationDetails {
        self.details
    }
}
