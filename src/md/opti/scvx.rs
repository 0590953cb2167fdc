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

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::time::Instant;
use typed_builder::TypedBuilder;

use super::solver::{ClarabelSolver, ConicSolver, SolveStatus, SolverSettings};
use super::subproblem::ConvexSubproblem;
use crate::dynamics::Dynamics;
use crate::errors::{
    ConfigurationSnafu, DiscretizationSnafu, InitialGuessSnafu, LinearizationFailureSnafu,
    SolverNumericalSnafu, SubproblemInfeasibleSnafu, SubproblemSetupSnafu, SubproblemSnafu,
};
use crate::io::{ConfigError, ConfigRepr, InvalidConfigSnafu};
use crate::md::discretization::{DiscretizationConfig, DiscretizationError, Discretizer};
use crate::md::trajectory::Trajectory;
use crate::propagators::error_ctrl::{AbsRelError, ErrorCtrl};
use crate::time::Duration;
use crate::ScvxError;

/// Weights of the objective terms of the convex subproblem.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct ScvxWeights {
    #[builder(default = 1e2)]
    pub virtual_control: f64,
    #[builder(default = 1.0)]
    pub trust_region_sigma: f64,
    #[builder(default = 1e-3)]
    pub trust_region_xu: f64,
    /// Weight of the total flight time
    #[builder(default = 1.0)]
    pub time: f64,
}

impl Default for ScvxWeights {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// When to stop the successive convexification.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Termination {
    /// Always run the configured number of iterations
    #[default]
    FixedIterations,
    /// Stop as soon as the norm of the virtual control and the trust region bounds are below these thresholds,
    /// or when the configured number of iterations is reached.
    Converged {
        virtual_control: f64,
        trust_region: f64,
    },
}

/// Configuration of the successive convexification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct ScvxConfig {
    /// Number of nodes K of the trajectory
    #[builder(default = 50)]
    pub nodes: usize,
    /// Maximum number of outer iterations
    #[builder(default = 10)]
    pub iterations: usize,
    #[builder(default)]
    pub weights: ScvxWeights,
    /// Enables the trust region on the states and controls of each node
    #[builder(default = true)]
    pub trust_region_xu: bool,
    #[builder(default)]
    pub termination: Termination,
    #[builder(default)]
    pub integrator: DiscretizationConfig,
    /// Discretize the intervals in parallel
    #[builder(default = false)]
    pub parallel: bool,
    #[builder(default)]
    pub solver: SolverSettings,
}

impl Default for ScvxConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConfigRepr for ScvxConfig {}

impl ScvxConfig {
    /// Ensures that the configuration can be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.nodes >= 2,
            InvalidConfigSnafu {
                msg: format!("at least two nodes are needed, got {}", self.nodes)
            }
        );
        ensure!(
            self.iterations > 0,
            InvalidConfigSnafu {
                msg: "at least one iteration is needed"
            }
        );
        for (name, weight) in [
            ("virtual control", self.weights.virtual_control),
            ("sigma trust region", self.weights.trust_region_sigma),
            ("state and control trust region", self.weights.trust_region_xu),
            ("time", self.weights.time),
        ] {
            ensure!(
                weight.is_finite() && weight > 0.0,
                InvalidConfigSnafu {
                    msg: format!("{name} weight must be positive, got {weight}")
                }
            );
        }
        ensure!(
            self.integrator.tolerance.is_finite() && self.integrator.tolerance > 0.0,
            InvalidConfigSnafu {
                msg: format!(
                    "integrator tolerance must be positive, got {}",
                    self.integrator.tolerance
                )
            }
        );
        for (name, fraction) in [
            ("initial step", self.integrator.init_step_fraction),
            ("minimum step", self.integrator.min_step_fraction),
        ] {
            ensure!(
                fraction > 0.0 && fraction <= 1.0,
                InvalidConfigSnafu {
                    msg: format!("{name} fraction must be in (0, 1], got {fraction}")
                }
            );
        }
        ensure!(
            self.integrator.attempts > 0,
            InvalidConfigSnafu {
                msg: "the integrator needs at least one attempt per step"
            }
        );
        for (name, tol) in [
            ("feasibility", self.solver.tol_feas),
            ("absolute gap", self.solver.tol_gap_abs),
            ("relative gap", self.solver.tol_gap_rel),
        ] {
            ensure!(
                tol.is_finite() && tol > 0.0,
                InvalidConfigSnafu {
                    msg: format!("solver {name} tolerance must be positive, got {tol}")
                }
            );
        }
        if let Termination::Converged {
            virtual_control,
            trust_region,
        } = self.termination
        {
            ensure!(
                virtual_control >= 0.0 && trust_region >= 0.0,
                InvalidConfigSnafu {
                    msg: "convergence thresholds must be non negative"
                }
            );
        }
        Ok(())
    }
}

/// Phase of the successive convexification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScvxPhase {
    Initializing,
    Linearizing,
    Solving,
    Updating,
    Terminated,
}

/// Summary of one outer iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    /// One based
    pub iteration: usize,
    /// Trajectory adopted at the end of this iteration
    pub trajectory: Trajectory,
    pub norm2_nu: f64,
    pub delta_sigma: f64,
    /// Sum of the state and control trust region bounds, zero if disabled
    pub delta_xu: f64,
    /// Largest distance between the nonlinear propagation of an interval and the next node of the reference
    pub max_defect: f64,
    pub objective: f64,
    pub solver_iterations: u32,
    pub linearization_time: Duration,
    pub solve_time: Duration,
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Iteration {}", self.iteration)?;
        writeln!(f, "{}", self.trajectory)?;
        writeln!(f, "norm2_nu   {}", self.norm2_nu)?;
        write!(f, "Delta_sigma   {}", self.delta_sigma)
    }
}

/// Result of the successive convexification.
#[derive(Clone, Debug, PartialEq)]
pub struct ScvxSolution {
    pub trajectory: Trajectory,
    pub iterations: Vec<IterationReport>,
    /// Whether the convergence criterion was met, always false with [Termination::FixedIterations]
    pub converged: bool,
}

impl ScvxSolution {
    pub fn last_report(&self) -> Option<&IterationReport> {
        self.iterations.last()
    }
}

/// Successive convexification of the free final time trajectory optimization problem of the provided dynamics.
///
/// Each iteration discretizes the dynamics about the current reference, solves the convex subproblem, and adopts
/// its solution as the next reference without any acceptance test.
pub struct SuccessiveConvexification<'a, D: Dynamics, S: ConicSolver, E: ErrorCtrl = AbsRelError> {
    pub dynamics: &'a D,
    pub cfg: ScvxConfig,
    pub solver: S,
    error_ctrl: E,
    subproblem: ConvexSubproblem,
    phase: ScvxPhase,
}

impl<'a, D: Dynamics, S: ConicSolver> SuccessiveConvexification<'a, D, S, AbsRelError> {
    /// Validates the configuration, then declares and compiles the convex subproblem.
    pub fn new(dynamics: &'a D, cfg: ScvxConfig, solver: S) -> Result<Self, ScvxError> {
        Self::with_error_ctrl(dynamics, cfg, solver, AbsRelError)
    }
}

impl<'a, D: Dynamics> SuccessiveConvexification<'a, D, ClarabelSolver, AbsRelError> {
    /// Same as `new` with a Clarabel solver built from the solver settings of the configuration.
    pub fn with_clarabel(dynamics: &'a D, cfg: ScvxConfig) -> Result<Self, ScvxError> {
        let solver = ClarabelSolver::new(cfg.solver);
        Self::new(dynamics, cfg, solver)
    }
}

impl<'a, D: Dynamics, S: ConicSolver, E: ErrorCtrl> SuccessiveConvexification<'a, D, S, E> {
    pub fn with_error_ctrl(
        dynamics: &'a D,
        cfg: ScvxConfig,
        solver: S,
        error_ctrl: E,
    ) -> Result<Self, ScvxError> {
        cfg.validate().context(ConfigurationSnafu)?;
        let tick = Instant::now();
        let subproblem =
            ConvexSubproblem::new(dynamics, cfg.nodes, &cfg.weights, cfg.trust_region_xu)
                .context(SubproblemSetupSnafu)?;
        let tock: Duration = tick.elapsed().into();
        info!(
            "Convex subproblem with {} nodes declared in {tock}",
            cfg.nodes
        );
        Ok(Self {
            dynamics,
            cfg,
            solver,
            error_ctrl,
            subproblem,
            phase: ScvxPhase::Initializing,
        })
    }

    pub fn phase(&self) -> ScvxPhase {
        self.phase
    }

    pub fn subproblem(&self) -> &ConvexSubproblem {
        &self.subproblem
    }

    /// Solves starting from the initial guess of the dynamics.
    pub fn solve(&mut self) -> Result<ScvxSolution, ScvxError> {
        self.phase = ScvxPhase::Initializing;
        let mut guess = Trajectory::zeros(
            D::N_STATES,
            D::N_INPUTS,
            self.cfg.nodes,
            self.dynamics.total_time_guess(),
        );
        if let Err(e) = self.dynamics.initialize(&mut guess) {
            error!("initial guess failed: {e}");
            self.phase = ScvxPhase::Terminated;
            return Err(ScvxError::InitialGuess { source: e });
        }
        self.solve_from(guess)
    }

    /// Solves starting from the provided reference trajectory.
    pub fn solve_from(&mut self, reference: Trajectory) -> Result<ScvxSolution, ScvxError> {
        let rslt = self.iterate(reference);
        self.phase = ScvxPhase::Terminated;
        if let Err(e) = &rslt {
            error!("successive convexification failed: {e}");
        }
        rslt
    }

    fn iterate(&mut self, mut reference: Trajectory) -> Result<ScvxSolution, ScvxError> {
        self.phase = ScvxPhase::Initializing;
        reference
            .check_dimensions(D::N_STATES, D::N_INPUTS, self.cfg.nodes)
            .context(InitialGuessSnafu)?;

        let discretizer =
            Discretizer::with_error_ctrl(self.dynamics, self.cfg.integrator, self.error_ctrl)
                .parallel(self.cfg.parallel);

        let mut reports = Vec::with_capacity(self.cfg.iterations);
        let mut converged = false;

        for iteration in 1..=self.cfg.iterations {
            self.phase = ScvxPhase::Linearizing;
            let tick = Instant::now();
            let models = match discretizer.discretize(&reference) {
                Ok(models) => models,
                Err(DiscretizationError::Interval { interval, source }) => {
                    return Err(source).context(LinearizationFailureSnafu {
                        iteration,
                        interval,
                    })
                }
                Err(e) => return Err(e).context(DiscretizationSnafu { iteration }),
            };
            let linearization_time: Duration = tick.elapsed().into();
            let max_defect = models
                .iter()
                .enumerate()
                .map(|(k, model)| (&model.propagated - reference.state(k + 1)).norm())
                .fold(0.0, f64::max);

            self.phase = ScvxPhase::Solving;
            let tick = Instant::now();
            self.subproblem
                .refresh(&models, &reference)
                .context(SubproblemSnafu { iteration })?;
            let sol = self
                .subproblem
                .solve(&mut self.solver)
                .context(SubproblemSnafu { iteration })?;
            let solve_time: Duration = tick.elapsed().into();
            match sol.status {
                SolveStatus::Solved => {}
                SolveStatus::Infeasible => {
                    return SubproblemInfeasibleSnafu {
                        iteration,
                        detail: sol.detail,
                    }
                    .fail()
                }
                SolveStatus::NumericalError => {
                    return SolverNumericalSnafu {
                        iteration,
                        detail: sol.detail,
                    }
                    .fail()
                }
            }

            self.phase = ScvxPhase::Updating;
            let sub = self
                .subproblem
                .solution()
                .context(SubproblemSnafu { iteration })?;
            reference = sub.trajectory;

            let report = IterationReport {
                iteration,
                trajectory: reference.clone(),
                norm2_nu: sub.norm2_nu,
                delta_sigma: sub.delta_sigma,
                delta_xu: sub.delta_xu.iter().sum(),
                max_defect,
                objective: sol.objective,
                solver_iterations: sol.iterations,
                linearization_time,
                solve_time,
            };
            info!(
                "Iteration {iteration}: sigma = {:.6}, norm2_nu = {:.3e}, Delta_sigma = {:.3e}, Delta_xu = {:.3e}, defect = {:.3e} (linearized in {linearization_time}, solved in {solve_time} after {} solver iterations)",
                reference.sigma,
                report.norm2_nu,
                report.delta_sigma,
                report.delta_xu,
                report.max_defect,
                report.solver_iterations,
            );
            debug!("{report}");

            let done = match self.cfg.termination {
                Termination::FixedIterations => false,
                Termination::Converged {
                    virtual_control,
                    trust_region,
                } => {
                    report.norm2_nu <= virtual_control
                        && report.delta_sigma <= trust_region
                        && report.delta_xu <= trust_region
                }
            };
            reports.push(report);
            if done {
                info!("Converged after {iteration} iterations");
                converged = true;
                break;
            }
        }

        if !converged && matches!(self.cfg.termination, Termination::Converged { .. }) {
            warn!(
                "Did not converge after {} iterations, returning the latest trajectory",
                self.cfg.iterations
            );
        }

        Ok(ScvxSolution {
            trajectory: reference,
            iterations: reports,
            converged,
        })
    }
}
