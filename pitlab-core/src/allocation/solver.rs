//! Convex solvers for [`AllocationProblem`].

use super::problem::AllocationProblem;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverFailure {
    #[error("infeasible: {0}")]
    Infeasible(String),
    #[error("unbounded: {0}")]
    Unbounded(String),
    #[error("numerical error: {0}")]
    NumericalError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    /// Stopped at the iteration cap close to, but not at, the tolerance.
    Inaccurate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub weights: DVector<f64>,
    pub status: SolveStatus,
    pub iterations: usize,
}

/// Numeric back end for the allocation step.
pub trait ConvexSolver: Send + Sync {
    fn name(&self) -> &str;
    fn solve(&self, problem: &AllocationProblem) -> Result<Solution, SolverFailure>;
}

// ── Projected gradient (FISTA) ───────────────────────────────────────

/// Accelerated proximal gradient with backtracking and function-value restart.
#[derive(Debug, Clone)]
pub struct ProjectedGradientSolver {
    pub max_iterations: usize,
    /// Stop when the gradient mapping's max-norm falls below this.
    pub tolerance: f64,
    /// Accept a capped run as `Inaccurate` below this gradient mapping.
    pub inaccurate_tolerance: f64,
}

impl Default for ProjectedGradientSolver {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            tolerance: 1e-9,
            inaccurate_tolerance: 1e-6,
        }
    }
}

const MAX_LIPSCHITZ: f64 = 1e20;

impl ConvexSolver for ProjectedGradientSolver {
    fn name(&self) -> &str {
        "projected_gradient"
    }

    fn solve(&self, problem: &AllocationProblem) -> Result<Solution, SolverFailure> {
        problem.validate()?;
        let n = problem.n();
        if n == 0 {
            return Ok(Solution {
                weights: DVector::zeros(0),
                status: SolveStatus::Optimal,
                iterations: 0,
            });
        }

        let mut x = problem.project(&problem.w_prev);
        let mut fx = checked(problem.objective(&x))?;
        let mut y = x.clone();
        let mut theta = 1.0_f64;
        let mut lip = 1.0_f64;
        let mut last_gm = f64::INFINITY;

        for iter in 1..=self.max_iterations {
            let fy = checked(problem.smooth_value(&y))?;
            let gy = problem.smooth_gradient(&y);
            if gy.iter().any(|g| !g.is_finite()) {
                return Err(SolverFailure::NumericalError("non-finite gradient".into()));
            }

            let z = loop {
                let step = 1.0 / lip;
                let z = problem.prox(&(&y - &gy * step), step);
                let d = &z - &y;
                let fz = checked(problem.smooth_value(&z))?;
                let model = fy + gy.dot(&d) + 0.5 * lip * d.norm_squared();
                if fz <= model + 1e-12 * fy.abs().max(1.0) {
                    break z;
                }
                lip *= 2.0;
                if lip > MAX_LIPSCHITZ {
                    return Err(SolverFailure::NumericalError(
                        "step size collapsed during line search".into(),
                    ));
                }
            };

            let gm = (&y - &z).amax() * lip;
            last_gm = gm;
            if gm < self.tolerance {
                return Ok(Solution {
                    weights: z,
                    status: SolveStatus::Optimal,
                    iterations: iter,
                });
            }

            let fz = checked(problem.objective(&z))?;
            if fz > fx && theta > 1.0 {
                // momentum overshot: restart from the last accepted point
                theta = 1.0;
                y = x.clone();
                continue;
            }

            let theta_next = (1.0 + (1.0 + 4.0 * theta * theta).sqrt()) / 2.0;
            y = &z + (&z - &x) * ((theta - 1.0) / theta_next);
            x = z;
            fx = fz;
            theta = theta_next;
        }

        if last_gm < self.inaccurate_tolerance {
            Ok(Solution {
                weights: x,
                status: SolveStatus::Inaccurate,
                iterations: self.max_iterations,
            })
        } else {
            Err(SolverFailure::NumericalError(format!(
                "no convergence after {} iterations (gradient mapping {last_gm:.3e})",
                self.max_iterations
            )))
        }
    }
}

fn checked(v: f64) -> Result<f64, SolverFailure> {
    if v.is_nan() {
        Err(SolverFailure::NumericalError("objective is NaN".into()))
    } else if v.is_infinite() {
        Err(SolverFailure::Unbounded("objective is not finite".into()))
    } else {
        Ok(v)
    }
}

// ── Signal proportional ──────────────────────────────────────────────

/// Weights proportional to expected return, normalized to sum to one and
/// clipped into the bounds. Ignores risk, costs and penalties.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProportionalSolver;

impl ConvexSolver for SignalProportionalSolver {
    fn name(&self) -> &str {
        "signal_proportional"
    }

    fn solve(&self, problem: &AllocationProblem) -> Result<Solution, SolverFailure> {
        problem.validate()?;
        let n = problem.n();
        let total = problem.mu.sum();
        let raw = if n == 0 {
            DVector::zeros(0)
        } else if total.abs() < f64::EPSILON {
            DVector::from_element(n, 1.0 / n as f64)
        } else {
            &problem.mu / total
        };
        Ok(Solution {
            weights: problem.project(&raw),
            status: SolveStatus::Optimal,
            iterations: 0,
        })
    }
}
