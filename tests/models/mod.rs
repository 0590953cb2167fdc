//! Small vehicle models used across the integration tests.

use scvx::dynamics::{Dynamics, DynamicsError};
use scvx::linalg::{DMatrix, DVector};
use scvx::md::opti::expr::Expr;
use scvx::md::opti::problem::{ProblemError, SocpProblem};
use scvx::md::opti::subproblem::{INPUTS, STATES};
use scvx::Trajectory;

/// x' = 0 for two states and one input
pub struct Static;

impl Dynamics for Static {
    const N_STATES: usize = 2;
    const N_INPUTS: usize = 1;

    fn eom(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(DVector::zeros(2))
    }

    fn state_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(2, 2))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(2, 1))
    }

    fn initialize(&self, _traj: &mut Trajectory) -> Result<(), DynamicsError> {
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        1.0
    }

    fn add_application_constraints(
        &self,
        _problem: &mut SocpProblem,
        _nodes: usize,
    ) -> Result<(), ProblemError> {
        Ok(())
    }
}

/// x' = u from x = 0 to x = 1, where the control is pinned to a constant at every node.
pub struct PinnedIntegrator {
    pub u: f64,
}

impl Dynamics for PinnedIntegrator {
    const N_STATES: usize = 1;
    const N_INPUTS: usize = 1;

    fn eom(&self, _x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(u.clone())
    }

    fn state_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(1, 1))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::identity(1, 1))
    }

    fn initialize(&self, traj: &mut Trajectory) -> Result<(), DynamicsError> {
        let nodes = traj.nodes();
        for k in 0..nodes {
            traj.states[(0, k)] = k as f64 / (nodes - 1) as f64;
        }
        traj.inputs.fill(self.u);
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        2.0
    }

    fn add_application_constraints(
        &self,
        problem: &mut SocpProblem,
        nodes: usize,
    ) -> Result<(), ProblemError> {
        let x = problem.variable(STATES)?.clone();
        let u = problem.variable(INPUTS)?.clone();
        problem.add_equality_constraint(x.expr(&[0, 0])?)?;
        problem.add_equality_constraint(x.expr(&[0, nodes - 1])?.minus(Expr::constant(1.0)))?;
        for k in 0..nodes {
            problem.add_equality_constraint(u.expr(&[0, k])?.minus(Expr::constant(self.u)))?;
        }
        Ok(())
    }
}

/// x' = u + 0.1 x², with |u| <= 1, from x = 0 to x = 1.
pub struct QuadraticDrift;

impl QuadraticDrift {
    /// Minimum time to go from 0 to 1 with u = 1 throughout
    pub fn minimum_time() -> f64 {
        let c = 0.1_f64.sqrt();
        c.atan() / c
    }
}

impl Dynamics for QuadraticDrift {
    const N_STATES: usize = 1;
    const N_INPUTS: usize = 1;

    fn eom(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(DVector::from_element(1, u[0] + 0.1 * x[0] * x[0]))
    }

    fn state_jacobian(
        &self,
        x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::from_element(1, 1, 0.2 * x[0]))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::identity(1, 1))
    }

    fn initialize(&self, traj: &mut Trajectory) -> Result<(), DynamicsError> {
        let nodes = traj.nodes();
        for k in 0..nodes {
            traj.states[(0, k)] = k as f64 / (nodes - 1) as f64;
        }
        traj.inputs.fill(0.5);
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        2.0
    }

    fn add_application_constraints(
        &self,
        problem: &mut SocpProblem,
        nodes: usize,
    ) -> Result<(), ProblemError> {
        let x = problem.variable(STATES)?.clone();
        let u = problem.variable(INPUTS)?.clone();
        problem.add_equality_constraint(x.expr(&[0, 0])?)?;
        problem.add_equality_constraint(x.expr(&[0, nodes - 1])?.minus(Expr::constant(1.0)))?;
        for k in 0..nodes {
            problem.add_cone_constraint(vec![u.expr(&[0, k])?], Expr::constant(1.0))?;
        }
        Ok(())
    }
}

/// x1' = c x2, x2' = 0 with a very large shear c: the STM [[1, c t], [0, 1]] is exact but becomes
/// ill conditioned within the first integration step.
pub struct Sheared;

impl Dynamics for Sheared {
    const N_STATES: usize = 2;
    const N_INPUTS: usize = 1;

    fn eom(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(DVector::zeros(2))
    }

    fn state_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::from_row_slice(2, 2, &[0.0, 1e9, 0.0, 0.0]))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(2, 1))
    }

    fn initialize(&self, _traj: &mut Trajectory) -> Result<(), DynamicsError> {
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        1.0
    }

    fn add_application_constraints(
        &self,
        _problem: &mut SocpProblem,
        _nodes: usize,
    ) -> Result<(), ProblemError> {
        Ok(())
    }
}

/// x' = 1e308: the derivative is finite but scaling it by a total time above one overflows.
pub struct Overflowing;

impl Dynamics for Overflowing {
    const N_STATES: usize = 1;
    const N_INPUTS: usize = 1;

    fn eom(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(DVector::from_element(1, 1e308))
    }

    fn state_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(1, 1))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(1, 1))
    }

    fn initialize(&self, _traj: &mut Trajectory) -> Result<(), DynamicsError> {
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        2.0
    }

    fn add_application_constraints(
        &self,
        _problem: &mut SocpProblem,
        _nodes: usize,
    ) -> Result<(), ProblemError> {
        Ok(())
    }
}

/// x' = u where the initial state is required to be both zero and one.
pub struct Contradictory;

impl Dynamics for Contradictory {
    const N_STATES: usize = 1;
    const N_INPUTS: usize = 1;

    fn eom(&self, _x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
        Ok(u.clone())
    }

    fn state_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::zeros(1, 1))
    }

    fn control_jacobian(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, DynamicsError> {
        Ok(DMatrix::identity(1, 1))
    }

    fn initialize(&self, _traj: &mut Trajectory) -> Result<(), DynamicsError> {
        Ok(())
    }

    fn total_time_guess(&self) -> f64 {
        1.0
    }

    fn add_application_constraints(
        &self,
        problem: &mut SocpProblem,
        _nodes: usize,
    ) -> Result<(), ProblemError> {
        let x = problem.variable(STATES)?.clone();
        problem.add_equality_constraint(x.expr(&[0, 0])?)?;
        problem.add_equality_constraint(x.expr(&[0, 0])?.minus(Expr::constant(1.0)))?;
        Ok(())
    }
}
