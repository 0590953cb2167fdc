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

use super::expr::{Expr, ParamId, Parameters, Scalar, Var};
use super::problem::{DimensionMismatchSnafu, ProblemError, SocpProblem, TensorVar};
use super::scvx::ScvxWeights;
use super::solver::{ConicSolution, ConicSolver};
use crate::dynamics::Dynamics;
use crate::linalg::{DMatrix, DVector};
use crate::md::discretization::AffineModel;
use crate::md::trajectory::Trajectory;

/// Name of the state trajectory variable, N_STATES x K
pub const STATES: &str = "X";
/// Name of the control trajectory variable, N_INPUTS x K
pub const INPUTS: &str = "U";
/// Name of the virtual control variable, N_STATES x (K-1)
pub const VIRTUAL_CONTROL: &str = "nu";
/// Name of the upper bound on the norm of the virtual control
pub const VIRTUAL_CONTROL_NORM: &str = "norm2_nu";
/// Name of the total time variable
pub const TOTAL_TIME: &str = "sigma";
/// Name of the bound on the squared change of total time
pub const TRUST_REGION_SIGMA: &str = "Delta_sigma";
/// Name of the per node bound on the squared change of state and control, K
pub const TRUST_REGION_XU: &str = "Delta_xu";

/// Parameter slots of the affine model of one interval, matrices are stored row major.
#[derive(Clone, Debug)]
struct IntervalSlots {
    a: Vec<ParamId>,
    b: Vec<ParamId>,
    c: Vec<ParamId>,
    sigma: Vec<ParamId>,
    z: Vec<ParamId>,
}

/// Solution of the convex subproblem.
#[derive(Clone, Debug, PartialEq)]
pub struct SubproblemSolution {
    pub trajectory: Trajectory,
    /// N_STATES x (K-1)
    pub virtual_control: DMatrix<f64>,
    pub norm2_nu: f64,
    pub delta_sigma: f64,
    /// Per node state and control trust region bound, empty if disabled
    pub delta_xu: Vec<f64>,
}

/// The convex subproblem solved at each iteration of the successive convexification.
///
/// Its structure is declared and compiled once. Each iteration only writes the affine models and the reference
/// trajectory into the parameters before solving.
pub struct ConvexSubproblem {
    problem: SocpProblem,
    n_states: usize,
    n_inputs: usize,
    nodes: usize,
    x: TensorVar,
    u: TensorVar,
    nu: TensorVar,
    norm2_nu: Var,
    sigma: Var,
    delta_sigma: Var,
    delta_xu: Option<TensorVar>,
    slots: Vec<IntervalSlots>,
    sigma_ref: ParamId,
    x_ref: Vec<ParamId>,
    u_ref: Vec<ParamId>,
}

impl ConvexSubproblem {
    /// Declares and compiles the subproblem for `nodes` nodes, including the constraints of the dynamics.
    pub fn new<D: Dynamics>(
        dynamics: &D,
        nodes: usize,
        weights: &ScvxWeights,
        trust_region_xu: bool,
    ) -> Result<Self, ProblemError> {
        let n = D::N_STATES;
        let m = D::N_INPUTS;
        ensure!(
            nodes >= 2,
            DimensionMismatchSnafu {
                what: "number of nodes",
                expected: 2_usize,
                got: nodes
            }
        );
        let mut problem = SocpProblem::new();

        let x = problem.declare_tensor_variable(STATES, &[n, nodes])?;
        let u = problem.declare_tensor_variable(INPUTS, &[m, nodes])?;
        let nu = problem.declare_tensor_variable(VIRTUAL_CONTROL, &[n, nodes - 1])?;
        let norm2_nu = problem
            .declare_tensor_variable(VIRTUAL_CONTROL_NORM, &[])?
            .scalar()?;
        let sigma = problem.declare_tensor_variable(TOTAL_TIME, &[])?.scalar()?;
        let delta_sigma = problem
            .declare_tensor_variable(TRUST_REGION_SIGMA, &[])?
            .scalar()?;
        let delta_xu = if trust_region_xu {
            Some(problem.declare_tensor_variable(TRUST_REGION_XU, &[nodes])?)
        } else {
            None
        };

        let sigma_ref = problem.declare_parameter("sigma_ref", dynamics.total_time_guess())?;

        // Dynamics, one equality per state and interval:
        // X(k+1) == A X(k) + B U(k) + C U(k+1) + Σ sigma + z + nu(k)
        let mut slots = Vec::with_capacity(nodes - 1);
        for k in 0..nodes - 1 {
            let mut declare = |name: &str, rows: usize, cols: usize| {
                let mut ids = Vec::with_capacity(rows * cols);
                for i in 0..rows {
                    for j in 0..cols {
                        ids.push(problem.declare_parameter(&format!("{name}_{k}[{i},{j}]"), 0.0)?);
                    }
                }
                Ok::<_, ProblemError>(ids)
            };
            let slot = IntervalSlots {
                a: declare("A", n, n)?,
                b: declare("B", n, m)?,
                c: declare("C", n, m)?,
                sigma: declare("Sigma", n, 1)?,
                z: declare("z", n, 1)?,
            };

            for i in 0..n {
                let mut rhs = Vec::new();
                for j in 0..n {
                    rhs.push((Scalar::Parameter(slot.a[i * n + j]), x.expr(&[j, k])?));
                }
                for j in 0..m {
                    rhs.push((Scalar::Parameter(slot.b[i * m + j]), u.expr(&[j, k])?));
                    rhs.push((Scalar::Parameter(slot.c[i * m + j]), u.expr(&[j, k + 1])?));
                }
                rhs.push((Scalar::Parameter(slot.sigma[i]), Expr::var(sigma)));
                rhs.push((Scalar::Constant(1.0), Expr::param(slot.z[i])));
                rhs.push((Scalar::Constant(1.0), nu.expr(&[i, k])?));
                problem.add_equality_constraint(
                    x.expr(&[i, k + 1])?
                        .minus(Expr::linear_combination(rhs)),
                )?;
            }
            slots.push(slot);
        }

        // || nu || <= norm2_nu
        let mut nu_args = Vec::with_capacity(nu.len());
        for i in 0..n {
            for k in 0..nodes - 1 {
                nu_args.push(nu.expr(&[i, k])?);
            }
        }
        problem.add_cone_constraint(nu_args, Expr::var(norm2_nu))?;

        // (sigma - sigma_ref)^2 <= Delta_sigma, as
        // || [-sigma_ref sigma - 0.5 Delta_sigma + 0.5 (1 + sigma_ref^2) ; sigma] || <= sigma_ref sigma + 0.5 Delta_sigma + 0.5 (1 - sigma_ref^2)
        let neg_ref = Scalar::callback(move |p: &Parameters| -p.get(sigma_ref));
        let offset_plus = Scalar::callback(move |p: &Parameters| 0.5 + 0.5 * p.get(sigma_ref).powi(2));
        let offset_minus = Scalar::callback(move |p: &Parameters| 0.5 - 0.5 * p.get(sigma_ref).powi(2));
        problem.add_cone_constraint(
            vec![
                Expr::linear_combination([
                    (neg_ref, Expr::var(sigma)),
                    (Scalar::Constant(-0.5), Expr::var(delta_sigma)),
                    (Scalar::Constant(1.0), Expr::Number(offset_plus)),
                ]),
                Expr::var(sigma),
            ],
            Expr::linear_combination([
                (Scalar::Parameter(sigma_ref), Expr::var(sigma)),
                (Scalar::Constant(0.5), Expr::var(delta_sigma)),
                (Scalar::Constant(1.0), Expr::Number(offset_minus)),
            ]),
        )?;

        let mut x_ref = Vec::with_capacity(n * nodes);
        let mut u_ref = Vec::with_capacity(m * nodes);
        for i in 0..n {
            for k in 0..nodes {
                x_ref.push(problem.declare_parameter(&format!("X_ref[{i},{k}]"), 0.0)?);
            }
        }
        for i in 0..m {
            for k in 0..nodes {
                u_ref.push(problem.declare_parameter(&format!("U_ref[{i},{k}]"), 0.0)?);
            }
        }

        // ||x(k) - x_ref(k)||^2 + ||u(k) - u_ref(k)||^2 <= Delta_xu(k), as
        // || [x(k) - x_ref(k) ; u(k) - u_ref(k) ; 0.5 Delta_xu(k) - 0.5] || <= 0.5 Delta_xu(k) + 0.5
        if let Some(delta_xu) = &delta_xu {
            for k in 0..nodes {
                let delta_k = delta_xu.expr(&[k])?;
                let mut args = Vec::with_capacity(n + m + 1);
                for i in 0..n {
                    args.push(x.expr(&[i, k])?.minus(Expr::param(x_ref[i * nodes + k])));
                }
                for i in 0..m {
                    args.push(u.expr(&[i, k])?.minus(Expr::param(u_ref[i * nodes + k])));
                }
                args.push(delta_k.clone().scaled(0.5).minus(Expr::constant(0.5)));
                problem.add_cone_constraint(args, delta_k.scaled(0.5).plus(Expr::constant(0.5)))?;
            }
            problem.add_minimization_term(
                weights.trust_region_xu,
                Expr::sum((0..nodes).map(|k| Expr::var(Var(delta_xu.offset + k)))),
            )?;
        }

        problem.add_minimization_term(weights.time, Expr::var(sigma))?;
        problem.add_minimization_term(weights.virtual_control, Expr::var(norm2_nu))?;
        problem.add_minimization_term(weights.trust_region_sigma, Expr::var(delta_sigma))?;

        dynamics.add_application_constraints(&mut problem, nodes)?;

        problem.compile_structure()?;

        Ok(Self {
            problem,
            n_states: n,
            n_inputs: m,
            nodes,
            x,
            u,
            nu,
            norm2_nu,
            sigma,
            delta_sigma,
            delta_xu,
            slots,
            sigma_ref,
            x_ref,
            u_ref,
        })
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn problem(&self) -> &SocpProblem {
        &self.problem
    }

    /// Writes the affine models of each interval and the reference trajectory into the parameters.
    pub fn refresh(
        &mut self,
        models: &[AffineModel],
        reference: &Trajectory,
    ) -> Result<(), ProblemError> {
        let n = self.n_states;
        let m = self.n_inputs;
        ensure!(
            models.len() == self.nodes - 1,
            DimensionMismatchSnafu {
                what: "affine models",
                expected: self.nodes - 1,
                got: models.len()
            }
        );
        ensure!(
            reference.states.shape() == (n, self.nodes),
            DimensionMismatchSnafu {
                what: "reference states",
                expected: n * self.nodes,
                got: reference.states.len()
            }
        );
        ensure!(
            reference.inputs.shape() == (m, self.nodes),
            DimensionMismatchSnafu {
                what: "reference inputs",
                expected: m * self.nodes,
                got: reference.inputs.len()
            }
        );

        let params = self.problem.parameters_mut();
        for (model, slot) in models.iter().zip(&self.slots) {
            ensure!(
                model.a.shape() == (n, n)
                    && model.b.shape() == (n, m)
                    && model.c.shape() == (n, m)
                    && model.sigma.len() == n
                    && model.z.len() == n,
                DimensionMismatchSnafu {
                    what: "affine model",
                    expected: n * (n + 2 * m + 2),
                    got: model.a.len()
                        + model.b.len()
                        + model.c.len()
                        + model.sigma.len()
                        + model.z.len()
                }
            );
            for i in 0..n {
                for j in 0..n {
                    params.set(slot.a[i * n + j], model.a[(i, j)])?;
                }
                for j in 0..m {
                    params.set(slot.b[i * m + j], model.b[(i, j)])?;
                    params.set(slot.c[i * m + j], model.c[(i, j)])?;
                }
                params.set(slot.sigma[i], model.sigma[i])?;
                params.set(slot.z[i], model.z[i])?;
            }
        }

        params.set(self.sigma_ref, reference.sigma)?;
        for i in 0..n {
            for k in 0..self.nodes {
                params.set(self.x_ref[i * self.nodes + k], reference.states[(i, k)])?;
            }
        }
        for i in 0..m {
            for k in 0..self.nodes {
                params.set(self.u_ref[i * self.nodes + k], reference.inputs[(i, k)])?;
            }
        }
        Ok(())
    }

    /// Solves the subproblem with the latest refreshed parameters.
    pub fn solve<S: ConicSolver>(&mut self, solver: &mut S) -> Result<ConicSolution, ProblemError> {
        self.problem.solve(solver)
    }

    /// Reads the solution of the latest successful solve.
    pub fn solution(&self) -> Result<SubproblemSolution, ProblemError> {
        let states = self.problem.tensor_value(&self.x.name)?;
        let inputs = self.problem.tensor_value(&self.u.name)?;
        let virtual_control = self.problem.tensor_value(&self.nu.name)?;
        let delta_xu = match &self.delta_xu {
            Some(delta_xu) => self
                .problem
                .tensor_value(&delta_xu.name)?
                .iter()
                .copied()
                .collect(),
            None => Vec::new(),
        };
        Ok(SubproblemSolution {
            trajectory: Trajectory {
                states,
                inputs,
                sigma: self.problem.solution_value(self.sigma)?,
            },
            virtual_control,
            norm2_nu: self.problem.solution_value(self.norm2_nu)?,
            delta_sigma: self.problem.solution_value(self.delta_sigma)?,
            delta_xu,
        })
    }
}

/// Returns the residual of the dynamics of each interval, i.e. x(k+1) minus the affine model evaluated at the solution.
pub fn dynamics_residuals(models: &[AffineModel], traj: &Trajectory) -> Vec<DVector<f64>> {
    models
        .iter()
        .enumerate()
        .map(|(k, model)| {
            traj.state(k + 1)
                - model.apply(&traj.state(k), &traj.input(k), &traj.input(k + 1), traj.sigma)
        })
        .collect()
}
