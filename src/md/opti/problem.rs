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
use std::collections::BTreeMap;

use super::expr::{Coefficient, Expr, ParamId, Parameters, Scalar, Var};
use super::solver::{
    ConeSpec, ConicProgram, ConicSolution, ConicSolver, SolveStatus, SolverError, SparsityPattern,
};
use crate::linalg::DMatrix;

/// A named, tensor shaped block of scalar decision variables. Indexing is row major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorVar {
    pub name: String,
    /// Index of the first scalar of this tensor in the variable vector
    pub offset: usize,
    pub shape: Vec<usize>,
}

impl TensorVar {
    /// Number of scalar variables, one for a scalar (empty shape)
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the scalar variable at the provided indices.
    pub fn at(&self, indices: &[usize]) -> Result<Var, ProblemError> {
        ensure!(
            indices.len() == self.shape.len(),
            RankMismatchSnafu {
                name: &self.name,
                expected: self.shape.len(),
                got: indices.len()
            }
        );
        let mut flat = 0;
        for (idx, dim) in indices.iter().zip(&self.shape) {
            ensure!(
                idx < dim,
                IndexOutOfBoundsSnafu {
                    name: &self.name,
                    indices: indices.to_vec()
                }
            );
            flat = flat * dim + idx;
        }
        Ok(Var(self.offset + flat))
    }

    pub fn scalar(&self) -> Result<Var, ProblemError> {
        self.at(&[])
    }

    /// Expression of the scalar variable at the provided indices.
    pub fn expr(&self, indices: &[usize]) -> Result<Expr, ProblemError> {
        Ok(Expr::Variable(self.at(indices)?))
    }
}

/// Structure of the program once compiled: the sparsity is fixed and every non zero keeps the list of
/// coefficients which are summed at each refresh.
struct Compiled {
    pattern: SparsityPattern,
    cones: Vec<ConeSpec>,
    a_coeffs: Vec<Vec<Coefficient>>,
    b_coeffs: Vec<Vec<Coefficient>>,
    q_coeffs: Vec<Vec<Coefficient>>,
    offset_coeffs: Vec<Coefficient>,
}

/// A second order cone program declared symbolically.
///
/// Variables, constraints and objective terms are declared first. Then `compile_structure` fixes the sparsity of
/// the program, after which only parameter values may change. Each solve re-evaluates every coefficient from the
/// current parameters.
#[derive(Default)]
pub struct SocpProblem {
    variables: Vec<TensorVar>,
    var_names: BTreeMap<String, usize>,
    n_vars: usize,
    params: Parameters,
    equalities: Vec<Expr>,
    inequalities: Vec<Expr>,
    cones: Vec<(Vec<Expr>, Expr)>,
    objective: Vec<(Scalar, Expr)>,
    compiled: Option<Compiled>,
    solution: Option<Vec<f64>>,
}

impl SocpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a tensor of variables, use an empty shape for a scalar variable.
    pub fn declare_tensor_variable(
        &mut self,
        name: &str,
        shape: &[usize],
    ) -> Result<TensorVar, ProblemError> {
        ensure!(self.compiled.is_none(), AlreadyCompiledSnafu);
        ensure!(
            !self.var_names.contains_key(name),
            DuplicateVariableSnafu { name }
        );
        let tensor = TensorVar {
            name: name.to_string(),
            offset: self.n_vars,
            shape: shape.to_vec(),
        };
        self.n_vars += tensor.len();
        self.var_names.insert(name.to_string(), self.variables.len());
        self.variables.push(tensor.clone());
        Ok(tensor)
    }

    /// Returns the previously declared variable of that name.
    pub fn variable(&self, name: &str) -> Result<&TensorVar, ProblemError> {
        self.var_names
            .get(name)
            .map(|idx| &self.variables[*idx])
            .context(UnknownVariableSnafu { name })
    }

    /// Returns the expression of the variable of that name at the provided indices.
    pub fn get_variable(&self, name: &str, indices: &[usize]) -> Result<Expr, ProblemError> {
        self.variable(name)?.expr(indices)
    }

    pub fn declare_parameter(&mut self, name: &str, value: f64) -> Result<ParamId, ProblemError> {
        self.params.declare(name, value)
    }

    pub fn parameter(&self, name: &str) -> Result<ParamId, ProblemError> {
        self.params.by_name(name)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Number of scalar decision variables
    pub fn n_variables(&self) -> usize {
        self.n_vars
    }

    /// Adds the constraint `expr == 0`.
    pub fn add_equality_constraint(&mut self, expr: Expr) -> Result<(), ProblemError> {
        self.check_expr(&expr)?;
        self.equalities.push(expr);
        Ok(())
    }

    /// Adds the constraint `expr >= 0`.
    pub fn add_inequality_constraint(&mut self, expr: Expr) -> Result<(), ProblemError> {
        self.check_expr(&expr)?;
        self.inequalities.push(expr);
        Ok(())
    }

    /// Adds the constraint `|| args ||_2 <= bound`.
    pub fn add_cone_constraint(&mut self, args: Vec<Expr>, bound: Expr) -> Result<(), ProblemError> {
        ensure!(!args.is_empty(), EmptyConeSnafu);
        for arg in &args {
            self.check_expr(arg)?;
        }
        self.check_expr(&bound)?;
        self.cones.push((args, bound));
        Ok(())
    }

    /// Adds `weight * expr` to the objective to minimize.
    pub fn add_minimization_term<S: Into<Scalar>>(
        &mut self,
        weight: S,
        expr: Expr,
    ) -> Result<(), ProblemError> {
        let weight = weight.into();
        self.check_expr(&expr.clone().scaled(weight.clone()))?;
        self.objective.push((weight, expr));
        Ok(())
    }

    fn check_expr(&self, expr: &Expr) -> Result<(), ProblemError> {
        ensure!(self.compiled.is_none(), AlreadyCompiledSnafu);
        let mut bad_var = None;
        expr.visit_vars(&mut |v| {
            if v.0 >= self.n_vars {
                bad_var = Some(v);
            }
        });
        if let Some(v) = bad_var {
            return UnknownVariableSnafu {
                name: format!("x{}", v.0),
            }
            .fail();
        }
        let mut bad_param = None;
        expr.visit_params(&mut |id| {
            if !self.params.contains(id) {
                bad_param = Some(id);
            }
        });
        if let Some(id) = bad_param {
            return UnknownParameterSnafu {
                name: format!("p{}", id.0),
            }
            .fail();
        }
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Fixes the structure of the program. Constraints and variables can no longer be added after this call.
    ///
    /// The rows are ordered with the equalities first, then the inequalities, then each cone with its bound first.
    pub fn compile_structure(&mut self) -> Result<(), ProblemError> {
        ensure!(self.compiled.is_none(), AlreadyCompiledSnafu);

        // Each row is stored with the sign of its variable terms and the sign of its constant.
        let mut rows: Vec<(&Expr, f64, f64)> = Vec::new();
        let mut cones = Vec::new();
        if !self.equalities.is_empty() {
            // a.x + c = 0 => A = a, b = -c
            rows.extend(self.equalities.iter().map(|e| (e, 1.0, -1.0)));
            cones.push(ConeSpec::Zero(self.equalities.len()));
        }
        if !self.inequalities.is_empty() {
            // a.x + c >= 0 => s = b - A x with A = -a, b = c
            rows.extend(self.inequalities.iter().map(|e| (e, -1.0, 1.0)));
            cones.push(ConeSpec::Nonnegative(self.inequalities.len()));
        }
        for (args, bound) in &self.cones {
            rows.push((bound, -1.0, 1.0));
            rows.extend(args.iter().map(|e| (e, -1.0, 1.0)));
            cones.push(ConeSpec::SecondOrder(args.len() + 1));
        }

        let n_rows = rows.len();
        let mut entries: Vec<(usize, usize, Coefficient)> = Vec::new();
        let mut b_coeffs = vec![Vec::new(); n_rows];
        for (row, (expr, a_sign, b_sign)) in rows.iter().enumerate() {
            for term in expr.linear_terms() {
                match term.var {
                    Some(v) => entries.push((v.0, row, scale(&term.coeff, *a_sign))),
                    None => b_coeffs[row].push(scale(&term.coeff, *b_sign)),
                }
            }
        }
        entries.sort_by_key(|(col, row, _)| (*col, *row));

        let mut colptr = vec![0; self.n_vars + 1];
        let mut rowval = Vec::new();
        let mut a_coeffs: Vec<Vec<Coefficient>> = Vec::new();
        let mut last: Option<(usize, usize)> = None;
        for (col, row, coeff) in entries {
            if last == Some((col, row)) {
                // Merge duplicates
                if let Some(coeffs) = a_coeffs.last_mut() {
                    coeffs.push(coeff);
                }
            } else {
                rowval.push(row);
                a_coeffs.push(vec![coeff]);
                colptr[col + 1] += 1;
                last = Some((col, row));
            }
        }
        for col in 0..self.n_vars {
            colptr[col + 1] += colptr[col];
        }

        let mut q_coeffs = vec![Vec::new(); self.n_vars];
        let mut offset_coeffs = Vec::new();
        for (weight, expr) in &self.objective {
            for term in expr.linear_terms() {
                let coeff = term.coeff.times(weight);
                match term.var {
                    Some(v) => q_coeffs[v.0].push(coeff),
                    None => offset_coeffs.push(coeff),
                }
            }
        }

        let pattern = SparsityPattern {
            n_rows,
            n_cols: self.n_vars,
            colptr,
            rowval,
        };
        info!(
            "SOCP structure: {} variables, {} parameters, {} rows, {} non zeros, {} cones",
            self.n_vars,
            self.params.len(),
            n_rows,
            pattern.nnz(),
            cones.len()
        );
        self.compiled = Some(Compiled {
            pattern,
            cones,
            a_coeffs,
            b_coeffs,
            q_coeffs,
            offset_coeffs,
        });
        Ok(())
    }

    /// Evaluates every coefficient of the compiled structure from the current parameter values.
    pub fn refresh(&self) -> Result<ConicProgram<'_>, ProblemError> {
        let compiled = self.compiled.as_ref().context(NotCompiledSnafu)?;
        let a_values = eval_all(&compiled.a_coeffs, &self.params, "constraint matrix")?;
        let b = eval_all(&compiled.b_coeffs, &self.params, "constraint constant")?;
        let q = eval_all(&compiled.q_coeffs, &self.params, "objective")?;
        let objective_offset = eval_sum(&compiled.offset_coeffs, &self.params);
        ensure!(
            objective_offset.is_finite(),
            NonFiniteCoefficientSnafu {
                what: "objective offset",
                index: 0_usize
            }
        );

        Ok(ConicProgram {
            pattern: &compiled.pattern,
            a_values,
            b,
            q,
            objective_offset,
            cones: &compiled.cones,
        })
    }

    /// Refreshes the coefficients and solves the program. The solution is stored only if the solver succeeded.
    pub fn solve<S: ConicSolver>(&mut self, solver: &mut S) -> Result<ConicSolution, ProblemError> {
        let sol = {
            let program = self.refresh()?;
            solver.solve(&program).context(BackendSnafu)?
        };
        self.solution = match sol.status {
            SolveStatus::Solved => Some(sol.x.clone()),
            _ => None,
        };
        Ok(sol)
    }

    /// Value of a scalar variable in the latest solution
    pub fn solution_value(&self, var: Var) -> Result<f64, ProblemError> {
        let x = self.solution.as_ref().context(NoSolutionSnafu)?;
        x.get(var.0).copied().context(UnknownVariableSnafu {
            name: format!("x{}", var.0),
        })
    }

    /// Value of the named variable at the provided indices in the latest solution.
    pub fn get_solution_value(&self, name: &str, indices: &[usize]) -> Result<f64, ProblemError> {
        let var = self.variable(name)?.at(indices)?;
        self.solution_value(var)
    }

    /// Value of the whole named variable in the latest solution, as a matrix: a scalar is 1x1 and a vector is a column.
    pub fn tensor_value(&self, name: &str) -> Result<DMatrix<f64>, ProblemError> {
        let tensor = self.variable(name)?;
        let x = self.solution.as_ref().context(NoSolutionSnafu)?;
        let (nrows, ncols) = match tensor.shape.as_slice() {
            [] => (1, 1),
            [n] => (*n, 1),
            [r, c] => (*r, *c),
            other => {
                return RankMismatchSnafu {
                    name,
                    expected: 2_usize,
                    got: other.len(),
                }
                .fail()
            }
        };
        let data = x
            .get(tensor.offset..tensor.offset + tensor.len())
            .context(NoSolutionSnafu)?;
        Ok(DMatrix::from_row_slice(nrows, ncols, data))
    }
}

fn scale(coeff: &Coefficient, sign: f64) -> Coefficient {
    if sign < 0.0 {
        coeff.negated()
    } else {
        coeff.clone()
    }
}

fn eval_sum(coeffs: &[Coefficient], params: &Parameters) -> f64 {
    coeffs.iter().map(|c| c.eval(params)).sum()
}

fn eval_all(
    coeffs: &[Vec<Coefficient>],
    params: &Parameters,
    what: &'static str,
) -> Result<Vec<f64>, ProblemError> {
    coeffs
        .iter()
        .enumerate()
        .map(|(index, c)| -> Result<f64, ProblemError> {
            let v = eval_sum(c, params);
            ensure!(v.is_finite(), NonFiniteCoefficientSnafu { what, index });
            Ok(v)
        })
        .collect()
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProblemError {
    #[snafu(display("unknown variable `{name}`"))]
    UnknownVariable { name: String },
    #[snafu(display("variable `{name}` already declared"))]
    DuplicateVariable { name: String },
    #[snafu(display("unknown parameter `{name}`"))]
    UnknownParameter { name: String },
    #[snafu(display("parameter `{name}` already declared"))]
    DuplicateParameter { name: String },
    #[snafu(display("indices {indices:?} out of bounds for `{name}`"))]
    IndexOutOfBounds { name: String, indices: Vec<usize> },
    #[snafu(display("`{name}` is of rank {got} but {expected} indices were expected"))]
    RankMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[snafu(display("{what} is of size {got} but {expected} was expected"))]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[snafu(display("a second order cone needs at least one argument"))]
    EmptyCone,
    #[snafu(display("problem structure is already compiled"))]
    AlreadyCompiled,
    #[snafu(display("problem structure must be compiled first"))]
    NotCompiled,
    #[snafu(display("no solution available"))]
    NoSolution,
    #[snafu(display("{what} coefficient #{index} is not finite"))]
    NonFiniteCoefficient { what: &'static str, index: usize },
    #[snafu(display("conic solver failed: {source}"))]
    Backend { source: SolverError },
}
