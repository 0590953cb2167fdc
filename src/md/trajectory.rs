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
use crate::linalg::{DMatrix, DVector};
use std::fmt;

/// The reference trajectory of the successive convexification.
///
/// States and controls are stored column-wise, one column per node, over a normalized time going from zero to one.
/// The physical time of node `k` is `sigma * k / (nodes - 1)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    /// States, N_STATES x nodes
    pub states: DMatrix<f64>,
    /// Controls, N_INPUTS x nodes
    pub inputs: DMatrix<f64>,
    /// Total flight time
    pub sigma: f64,
}

impl Trajectory {
    /// Initializes a trajectory of `nodes` nodes where all states and controls are zero.
    pub fn zeros(n_states: usize, n_inputs: usize, nodes: usize, sigma: f64) -> Self {
        Self {
            states: DMatrix::zeros(n_states, nodes),
            inputs: DMatrix::zeros(n_inputs, nodes),
            sigma,
        }
    }

    pub fn nodes(&self) -> usize {
        self.states.ncols()
    }

    pub fn n_states(&self) -> usize {
        self.states.nrows()
    }

    pub fn n_inputs(&self) -> usize {
        self.inputs.nrows()
    }

    /// Width of each interval in normalized time, infinite if there are fewer than two nodes
    pub fn dt(&self) -> f64 {
        1.0 / (self.nodes().saturating_sub(1) as f64)
    }

    /// State at node `k`
    pub fn state(&self, k: usize) -> DVector<f64> {
        self.states.column(k).into_owned()
    }

    /// Control at node `k`
    pub fn input(&self, k: usize) -> DVector<f64> {
        self.inputs.column(k).into_owned()
    }

    /// Physical time of each node
    pub fn times(&self) -> Vec<f64> {
        if self.nodes() < 2 {
            return vec![0.0; self.nodes()];
        }
        let dt = self.dt();
        (0..self.nodes())
            .map(|k| self.sigma * dt * (k as f64))
            .collect()
    }

    /// Ensures that this trajectory has the expected number of states, inputs and nodes.
    pub fn check_dimensions(
        &self,
        n_states: usize,
        n_inputs: usize,
        nodes: usize,
    ) -> Result<(), DynamicsError> {
        if self.n_states() != n_states {
            return Err(DynamicsError::DimensionMismatch {
                what: "trajectory states",
                expected: n_states,
                got: self.n_states(),
            });
        }
        if self.n_inputs() != n_inputs {
            return Err(DynamicsError::DimensionMismatch {
                what: "trajectory inputs",
                expected: n_inputs,
                got: self.n_inputs(),
            });
        }
        if self.nodes() != nodes || self.inputs.ncols() != nodes {
            return Err(DynamicsError::DimensionMismatch {
                what: "trajectory nodes",
                expected: nodes,
                got: self.nodes().min(self.inputs.ncols()),
            });
        }
        if !self.sigma.is_finite() {
            return Err(DynamicsError::NonFiniteDerivative {
                what: "total flight time",
            });
        }
        Ok(())
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "X")?;
        for row in self.states.row_iter() {
            for val in row.iter() {
                write!(f, "{val}  ")?;
            }
            writeln!(f, ";")?;
        }
        writeln!(f, "U")?;
        for row in self.inputs.row_iter() {
            for val in row.iter() {
                write!(f, "{val}  ")?;
            }
            writeln!(f, ";")?;
        }
        write!(f, "sigma   {}", self.sigma)
    }
}
