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

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, SecondOrderConeT, ZeroConeT},
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use typed_builder::TypedBuilder;

/// Column compressed sparsity pattern of the constraint matrix. Rows are sorted within each column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparsityPattern {
    pub n_rows: usize,
    pub n_cols: usize,
    pub colptr: Vec<usize>,
    pub rowval: Vec<usize>,
}

impl SparsityPattern {
    pub fn nnz(&self) -> usize {
        self.rowval.len()
    }
}

/// Cones of the program, in the order of the rows of the constraint matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConeSpec {
    Zero(usize),
    Nonnegative(usize),
    SecondOrder(usize),
}

impl ConeSpec {
    pub fn dim(&self) -> usize {
        match self {
            Self::Zero(d) | Self::Nonnegative(d) | Self::SecondOrder(d) => *d,
        }
    }
}

/// A conic program in standard form:
///
/// minimize q'x subject to A x + s = b, s ∈ K
#[derive(Clone, Debug)]
pub struct ConicProgram<'a> {
    pub pattern: &'a SparsityPattern,
    /// Non zero values of A, following the pattern
    pub a_values: Vec<f64>,
    pub b: Vec<f64>,
    pub q: Vec<f64>,
    /// Constant part of the objective
    pub objective_offset: f64,
    pub cones: &'a [ConeSpec],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Solved,
    Infeasible,
    NumericalError,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConicSolution {
    pub status: SolveStatus,
    /// Primal solution, meaningful only if solved
    pub x: Vec<f64>,
    /// Objective value, including the constant offset
    pub objective: f64,
    pub iterations: u32,
    /// Solver specific status description
    pub detail: String,
}

/// A second order cone solver.
///
/// The structure of the programs passed to the same solver does not change between calls, only the values do.
pub trait ConicSolver {
    fn solve(&mut self, program: &ConicProgram) -> Result<ConicSolution, SolverError>;
}

/// Settings of the interior point solver.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct SolverSettings {
    #[builder(default = 200)]
    pub max_iter: u32,
    #[builder(default = 1e-8)]
    pub tol_feas: f64,
    #[builder(default = 1e-8)]
    pub tol_gap_abs: f64,
    #[builder(default = 1e-8)]
    pub tol_gap_rel: f64,
    #[builder(default = false)]
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Interior point conic solver backed by Clarabel.
#[derive(Clone, Debug, Default)]
pub struct ClarabelSolver {
    pub settings: SolverSettings,
}

impl ClarabelSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }
}

impl ConicSolver for ClarabelSolver {
    fn solve(&mut self, program: &ConicProgram) -> Result<ConicSolution, SolverError> {
        let n = program.pattern.n_cols;
        let m = program.pattern.n_rows;
        ensure!(
            program.a_values.len() == program.pattern.nnz(),
            DimensionSnafu {
                what: "constraint values",
                expected: program.pattern.nnz(),
                got: program.a_values.len()
            }
        );
        ensure!(
            program.b.len() == m,
            DimensionSnafu {
                what: "constraint constants",
                expected: m,
                got: program.b.len()
            }
        );
        ensure!(
            program.q.len() == n,
            DimensionSnafu {
                what: "objective",
                expected: n,
                got: program.q.len()
            }
        );

        // Purely linear objective
        let p_csc = CscMatrix::new(n, n, vec![0; n + 1], vec![], vec![]);
        let a_csc = CscMatrix::new(
            m,
            n,
            program.pattern.colptr.clone(),
            program.pattern.rowval.clone(),
            program.a_values.clone(),
        );
        let cones: Vec<SupportedConeT<f64>> = program
            .cones
            .iter()
            .map(|cone| match cone {
                ConeSpec::Zero(d) => ZeroConeT(*d),
                ConeSpec::Nonnegative(d) => NonnegativeConeT(*d),
                ConeSpec::SecondOrder(d) => SecondOrderConeT(*d),
            })
            .collect();

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .verbose(self.settings.verbose)
            .tol_feas(self.settings.tol_feas)
            .tol_gap_abs(self.settings.tol_gap_abs)
            .tol_gap_rel(self.settings.tol_gap_rel)
            .build()
            .map_err(|e| SolverError::Setup {
                msg: format!("{e:?}"),
            })?;

        let mut solver = DefaultSolver::new(&p_csc, &program.q, &a_csc, &program.b, &cones, settings)
            .map_err(|e| SolverError::Setup {
                msg: format!("{e:?}"),
            })?;
        solver.solve();
        let sol = &solver.solution;

        let status = match sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Solved,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                SolveStatus::Infeasible
            }
            _ => SolveStatus::NumericalError,
        };

        if status == SolveStatus::Solved {
            ensure!(
                sol.x.len() == n,
                DimensionSnafu {
                    what: "primal solution",
                    expected: n,
                    got: sol.x.len()
                }
            );
        }

        Ok(ConicSolution {
            status,
            x: sol.x.clone(),
            objective: sol.obj_val + program.objective_offset,
            iterations: sol.iterations,
            detail: format!("{:?}", sol.status),
        })
    }
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SolverError {
    #[snafu(display("could not set up the conic solver: {msg}"))]
    Setup { msg: String },
    #[snafu(display("{what} is of size {got} but {expected} was expected"))]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}
