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
use std::fmt;
use std::sync::Arc;

use super::problem::{DuplicateParameterSnafu, ProblemError, UnknownParameterSnafu};

/// Index of a scalar decision variable in the flattened variable vector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(pub usize);

/// Index of a numeric parameter slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamId(pub usize);

/// A function of the parameters, evaluated during the refresh of the problem.
pub type ParamFn = Arc<dyn Fn(&Parameters) -> f64 + Send + Sync>;

/// A numeric coefficient of an expression.
#[derive(Clone)]
pub enum Scalar {
    /// Fixed value, known when the structure is declared
    Constant(f64),
    /// Value of a parameter slot at refresh time
    Parameter(ParamId),
    /// Computed from the parameters at refresh time
    Callback(ParamFn),
}

impl Scalar {
    /// Builds a scalar computed from the parameters at each refresh.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Parameters) -> f64 + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    pub fn eval(&self, params: &Parameters) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Parameter(id) => params.get(*id),
            Self::Callback(f) => f(params),
        }
    }

    fn param_id(&self) -> Option<ParamId> {
        match self {
            Self::Parameter(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl From<ParamId> for Scalar {
    fn from(id: ParamId) -> Self {
        Self::Parameter(id)
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::Parameter(id) => write!(f, "p{}", id.0),
            Self::Callback(_) => write!(f, "<callback>"),
        }
    }
}

/// An affine expression of the decision variables.
///
/// Expressions are only a description: no coefficient is computed until the problem is refreshed.
#[derive(Clone, Debug)]
pub enum Expr {
    Variable(Var),
    Number(Scalar),
    WeightedSum(Vec<(Scalar, Expr)>),
}

impl Expr {
    pub fn var(v: Var) -> Self {
        Self::Variable(v)
    }

    pub fn constant(v: f64) -> Self {
        Self::Number(Scalar::Constant(v))
    }

    pub fn param(id: ParamId) -> Self {
        Self::Number(Scalar::Parameter(id))
    }

    pub fn zero() -> Self {
        Self::WeightedSum(Vec::new())
    }

    /// Multiplies this expression by the provided scalar.
    pub fn scaled<S: Into<Scalar>>(self, s: S) -> Self {
        Self::WeightedSum(vec![(s.into(), self)])
    }

    pub fn plus(self, other: Expr) -> Self {
        self.plus_scaled(1.0, other)
    }

    pub fn minus(self, other: Expr) -> Self {
        self.plus_scaled(-1.0, other)
    }

    /// Returns self + s * other
    pub fn plus_scaled<S: Into<Scalar>>(self, s: S, other: Expr) -> Self {
        match self {
            Self::WeightedSum(mut terms) => {
                terms.push((s.into(), other));
                Self::WeightedSum(terms)
            }
            me => Self::WeightedSum(vec![(Scalar::Constant(1.0), me), (s.into(), other)]),
        }
    }

    /// Sum of all of the provided expressions
    pub fn sum<I: IntoIterator<Item = Expr>>(exprs: I) -> Self {
        Self::WeightedSum(
            exprs
                .into_iter()
                .map(|e| (Scalar::Constant(1.0), e))
                .collect(),
        )
    }

    /// Linear combination of the provided (weight, expression) pairs
    pub fn linear_combination<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<Scalar>,
    {
        Self::WeightedSum(terms.into_iter().map(|(s, e)| (s.into(), e)).collect())
    }

    /// Flattens this expression into a list of terms, each either a coefficient times a variable, or a constant.
    pub fn linear_terms(&self) -> Vec<LinearTerm> {
        let mut terms = Vec::new();
        self.flatten(&Coefficient::one(), &mut terms);
        terms
    }

    fn flatten(&self, coeff: &Coefficient, terms: &mut Vec<LinearTerm>) {
        match self {
            Self::Variable(v) => terms.push(LinearTerm {
                coeff: coeff.clone(),
                var: Some(*v),
            }),
            Self::Number(s) => terms.push(LinearTerm {
                coeff: coeff.times(s),
                var: None,
            }),
            Self::WeightedSum(items) => {
                for (s, e) in items {
                    e.flatten(&coeff.times(s), terms);
                }
            }
        }
    }

    /// Calls `f` on every parameter referenced directly by this expression.
    pub(crate) fn visit_params(&self, f: &mut dyn FnMut(ParamId)) {
        match self {
            Self::Variable(_) => {}
            Self::Number(s) => {
                if let Some(id) = s.param_id() {
                    f(id)
                }
            }
            Self::WeightedSum(items) => {
                for (s, e) in items {
                    if let Some(id) = s.param_id() {
                        f(id)
                    }
                    e.visit_params(f);
                }
            }
        }
    }

    /// Calls `f` on every variable of this expression.
    pub(crate) fn visit_vars(&self, f: &mut dyn FnMut(Var)) {
        match self {
            Self::Variable(v) => f(*v),
            Self::Number(_) => {}
            Self::WeightedSum(items) => {
                for (_, e) in items {
                    e.visit_vars(f);
                }
            }
        }
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Self {
        Self::Variable(v)
    }
}

/// Product of a constant factor and of scalars evaluated at refresh time.
#[derive(Clone, Debug)]
pub struct Coefficient {
    pub factor: f64,
    pub scalars: Vec<Scalar>,
}

impl Coefficient {
    pub fn one() -> Self {
        Self {
            factor: 1.0,
            scalars: Vec::new(),
        }
    }

    /// Returns this coefficient multiplied by `s`. Constants are folded into the factor.
    pub fn times(&self, s: &Scalar) -> Self {
        let mut me = self.clone();
        match s {
            Scalar::Constant(v) => me.factor *= v,
            other => me.scalars.push(other.clone()),
        }
        me
    }

    /// Returns this coefficient with its sign flipped
    pub fn negated(&self) -> Self {
        let mut me = self.clone();
        me.factor = -me.factor;
        me
    }

    /// Whether this coefficient is known without any parameter
    pub fn is_constant(&self) -> bool {
        self.scalars.is_empty()
    }

    pub fn eval(&self, params: &Parameters) -> f64 {
        self.scalars
            .iter()
            .fold(self.factor, |acc, s| acc * s.eval(params))
    }
}

/// A single term of a flattened expression.
#[derive(Clone, Debug)]
pub struct LinearTerm {
    pub coeff: Coefficient,
    /// None for a constant term
    pub var: Option<Var>,
}

/// Named numeric parameter slots of a problem.
#[derive(Clone, Debug, Default)]
pub struct Parameters {
    values: Vec<f64>,
    names: BTreeMap<String, ParamId>,
}

impl Parameters {
    /// Declares a new parameter initialized to `value`.
    pub fn declare(&mut self, name: &str, value: f64) -> Result<ParamId, ProblemError> {
        ensure!(
            !self.names.contains_key(name),
            DuplicateParameterSnafu { name }
        );
        let id = ParamId(self.values.len());
        self.values.push(value);
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Sets the value of the parameter.
    pub fn set(&mut self, id: ParamId, value: f64) -> Result<(), ProblemError> {
        match self.values.get_mut(id.0) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => UnknownParameterSnafu {
                name: format!("p{}", id.0),
            }
            .fail(),
        }
    }

    /// Returns the value of the parameter, or NaN if this parameter does not exist.
    pub fn get(&self, id: ParamId) -> f64 {
        self.values.get(id.0).copied().unwrap_or(f64::NAN)
    }

    pub fn by_name(&self, name: &str) -> Result<ParamId, ProblemError> {
        self.names
            .get(name)
            .copied()
            .context(UnknownParameterSnafu { name })
    }

    pub fn contains(&self, id: ParamId) -> bool {
        id.0 < self.values.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
