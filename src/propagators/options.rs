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

use std::fmt;

use super::ErrorCtrl;
use typed_builder::TypedBuilder;

/// PropOpts stores the integrator options, including the minimum and maximum step sizes, and the
/// max error size.
///
/// All step sizes are in the time unit of the integrated system, i.e. normalized time for the discretization.
/// The step bounds and the tolerance are only used by the adaptive step, ignored when `fixed_step` is set.
#[derive(Clone, Copy, Debug, TypedBuilder)]
#[builder(doc)]
pub struct PropOpts<E: ErrorCtrl> {
    #[builder(default = 0.1)]
    pub init_step: f64,
    #[builder(default = 1e-6)]
    pub min_step: f64,
    #[builder(default = 1.0)]
    pub max_step: f64,
    #[builder(default = 1e-4)]
    pub tolerance: f64,
    #[builder(default = 50)]
    pub attempts: u8,
    #[builder(default = false)]
    pub fixed_step: bool,
    pub error_ctrl: E,
}

impl<E: ErrorCtrl> fmt::Display for PropOpts<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fixed_step {
            write!(f, "fixed step: {:e}", self.init_step)
        } else {
            write!(
                f,
                "min_step: {:e}, max_step: {:e}, tol: {:e}, attempts: {}",
                self.min_step, self.max_step, self.tolerance, self.attempts,
            )
        }
    }
}

#[test]
fn test_options() {
    use super::error_ctrl::AbsRelError;

    let opts = PropOpts::builder().error_ctrl(AbsRelError).build();
    assert_eq!(opts.init_step, 0.1);
    assert_eq!(opts.min_step, 1e-6);
    assert_eq!(opts.max_step, 1.0);
    assert!((opts.tolerance - 1e-4).abs() < f64::EPSILON);
    assert_eq!(opts.attempts, 50);
    assert!(!opts.fixed_step);
    assert_eq!(
        format!("{opts}"),
        "min_step: 1e-6, max_step: 1e0, tol: 1e-4, attempts: 50"
    );

    let opts = PropOpts::builder()
        .init_step(0.25)
        .fixed_step(true)
        .error_ctrl(AbsRelError)
        .build();
    assert!(opts.fixed_step);
    assert_eq!(format!("{opts}"), "fixed step: 2.5e-1");
}
