use super::solver::SolverFailure;
use crate::config::PenaltyConfig;
use crate::execution::PowerLawImpact;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Smoothing width for absolute values inside penalty terms.
const ABS_EPS: f64 = 1e-4;
/// Smoothing width for the `|Δw|^q` impact term.
const IMPACT_EPS: f64 = 1e-4;

fn smooth_abs(x: f64) -> f64 {
    (x * x + ABS_EPS * ABS_EPS).sqrt()
}

fn smooth_abs_grad(x: f64) -> f64 {
    x / smooth_abs(x)
}

/// `maximize  w·μ − ½λ·wᵀΣw − Σ c_i|Δw_i| − Σ k_i|Δw_i|^q − penalties(w)`
/// subject to `lower ≤ w ≤ upper`, posed as minimization of the negation.
///
/// Per-share impact grows as participation^p and participation is
/// proportional to `|Δw|`, so the total impact paid is `|Δw|^(1+p)`:
/// `q = 1 + p`.
///
/// The linear cost and the bounds form the non-smooth part handled by the
/// solver's proximal step. Everything else is smooth.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationProblem {
    pub mu: DVector<f64>,
    pub sigma: DMatrix<f64>,
    pub risk_aversion: f64,
    pub w_prev: DVector<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    /// Cost per unit of weight traded.
    pub linear_cost: DVector<f64>,
    /// Impact coefficient per security.
    pub impact: DVector<f64>,
    /// Power `q` on `|Δw|` in the impact term, in `[1, 2]`.
    pub impact_power: f64,
    pub penalties: PenaltyConfig,
    /// n×k factor exposures for the factor-neutrality penalty.
    pub exposures: DMatrix<f64>,
}

/// Soft-constraint violations of a weight vector. Zero means satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Violations {
    pub leverage: f64,
    pub turnover: f64,
    pub net: f64,
    pub factor: f64,
}

impl AllocationProblem {
    /// Mean-variance problem with symmetric bounds and no costs or penalties.
    pub fn mean_variance(
        mu: DVector<f64>,
        sigma: DMatrix<f64>,
        risk_aversion: f64,
        w_prev: DVector<f64>,
        bound: f64,
    ) -> Self {
        let n = mu.len();
        Self {
            sigma,
            risk_aversion,
            w_prev,
            lower: DVector::from_element(n, -bound),
            upper: DVector::from_element(n, bound),
            linear_cost: DVector::zeros(n),
            impact: DVector::zeros(n),
            impact_power: 1.0 + PowerLawImpact::EXPONENT,
            penalties: PenaltyConfig::none(),
            exposures: DMatrix::zeros(n, 0),
            mu,
        }
    }

    pub fn n(&self) -> usize {
        self.mu.len()
    }

    /// Shape and sanity checks before solving.
    pub fn validate(&self) -> Result<(), SolverFailure> {
        let n = self.n();
        let shapes_ok = self.sigma.shape() == (n, n)
            && self.w_prev.len() == n
            && self.lower.len() == n
            && self.upper.len() == n
            && self.linear_cost.len() == n
            && self.impact.len() == n
            && self.exposures.nrows() == n;
        if !shapes_ok {
            return Err(SolverFailure::Infeasible(
                "inconsistent problem dimensions".into(),
            ));
        }
        if !(1.0..=2.0).contains(&self.impact_power) {
            return Err(SolverFailure::Infeasible(format!(
                "impact power {} outside [1, 2]",
                self.impact_power
            )));
        }
        if self.lower.iter().zip(self.upper.iter()).any(|(l, u)| l > u) {
            return Err(SolverFailure::Infeasible("lower bound above upper bound".into()));
        }
        let finite = self.mu.iter().all(|v| v.is_finite())
            && self.sigma.iter().all(|v| v.is_finite())
            && self.w_prev.iter().all(|v| v.is_finite())
            && self.linear_cost.iter().all(|v| v.is_finite() && *v >= 0.0)
            && self.impact.iter().all(|v| v.is_finite() && *v >= 0.0)
            && self.exposures.iter().all(|v| v.is_finite())
            && self.risk_aversion.is_finite();
        if !finite {
            return Err(SolverFailure::NumericalError(
                "non-finite or negative problem data".into(),
            ));
        }
        let unbounded_box = self
            .lower
            .iter()
            .chain(self.upper.iter())
            .any(|v| !v.is_finite());
        if unbounded_box && self.risk_aversion <= 0.0 {
            return Err(SolverFailure::Unbounded(
                "no risk term and an open bound".into(),
            ));
        }
        Ok(())
    }

    fn factor_exposure(&self, w: &DVector<f64>) -> DVector<f64> {
        self.exposures.tr_mul(w)
    }

    /// Smooth part of the minimization objective.
    pub fn smooth_value(&self, w: &DVector<f64>) -> f64 {
        let p = &self.penalties;
        let dw = w - &self.w_prev;
        let q = self.impact_power;
        let mut v = -w.dot(&self.mu) + 0.5 * self.risk_aversion * w.dot(&(&self.sigma * w));
        v += dw
            .iter()
            .zip(self.impact.iter())
            .map(|(d, k)| k * ((d * d + IMPACT_EPS * IMPACT_EPS).powf(q / 2.0) - IMPACT_EPS.powf(q)))
            .sum::<f64>();

        if p.leverage > 0.0 {
            let excess = (w.iter().map(|&x| smooth_abs(x)).sum::<f64>() - p.leverage_limit).max(0.0);
            v += p.leverage * excess * excess;
        }
        if p.turnover > 0.0 {
            let excess = (dw.iter().map(|&x| smooth_abs(x)).sum::<f64>() - p.turnover_limit).max(0.0);
            v += p.turnover * excess * excess;
        }
        if p.net > 0.0 {
            let dev = w.sum() - p.net_target;
            v += p.net * dev * dev;
        }
        if p.factor > 0.0 && self.exposures.ncols() > 0 {
            v += p.factor * self.factor_exposure(w).norm_squared();
        }
        v
    }

    pub fn smooth_gradient(&self, w: &DVector<f64>) -> DVector<f64> {
        let p = &self.penalties;
        let dw = w - &self.w_prev;
        let q = self.impact_power;
        let mut g = -&self.mu + (&self.sigma * w) * self.risk_aversion;
        for i in 0..self.n() {
            let d = dw[i];
            g[i] += self.impact[i] * q * d * (d * d + IMPACT_EPS * IMPACT_EPS).powf(q / 2.0 - 1.0);
        }

        if p.leverage > 0.0 {
            let excess = w.iter().map(|&x| smooth_abs(x)).sum::<f64>() - p.leverage_limit;
            if excess > 0.0 {
                for i in 0..self.n() {
                    g[i] += 2.0 * p.leverage * excess * smooth_abs_grad(w[i]);
                }
            }
        }
        if p.turnover > 0.0 {
            let excess = dw.iter().map(|&x| smooth_abs(x)).sum::<f64>() - p.turnover_limit;
            if excess > 0.0 {
                for i in 0..self.n() {
                    g[i] += 2.0 * p.turnover * excess * smooth_abs_grad(dw[i]);
                }
            }
        }
        if p.net > 0.0 {
            let dev = w.sum() - p.net_target;
            g.add_scalar_mut(2.0 * p.net * dev);
        }
        if p.factor > 0.0 && self.exposures.ncols() > 0 {
            g += (&self.exposures * self.factor_exposure(w)) * (2.0 * p.factor);
        }
        g
    }

    /// Linear transaction cost (the non-smooth part, bounds aside).
    pub fn linear_cost_value(&self, w: &DVector<f64>) -> f64 {
        (w - &self.w_prev)
            .iter()
            .zip(self.linear_cost.iter())
            .map(|(d, c)| c * d.abs())
            .sum()
    }

    /// Full minimization objective.
    pub fn objective(&self, w: &DVector<f64>) -> f64 {
        self.smooth_value(w) + self.linear_cost_value(w)
    }

    /// `U(w)`, the quantity being maximized.
    pub fn utility(&self, w: &DVector<f64>) -> f64 {
        -self.objective(w)
    }

    /// Proximal operator of `t·Σ c_i|w_i − w_prev_i|` plus the box: soft
    /// threshold around `w_prev`, then clip.
    pub fn prox(&self, v: &DVector<f64>, t: f64) -> DVector<f64> {
        DVector::from_fn(self.n(), |i, _| {
            let u = v[i] - self.w_prev[i];
            let shrunk = u.signum() * (u.abs() - t * self.linear_cost[i]).max(0.0);
            (self.w_prev[i] + shrunk).clamp(self.lower[i], self.upper[i])
        })
    }

    /// Clip a vector into the box.
    pub fn project(&self, w: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.n(), |i, _| w[i].clamp(self.lower[i], self.upper[i]))
    }

    pub fn violations(&self, w: &DVector<f64>) -> Violations {
        let p = &self.penalties;
        let gross: f64 = w.iter().map(|x| x.abs()).sum();
        let turnover: f64 = (w - &self.w_prev).iter().map(|x| x.abs()).sum();
        let factor = if self.exposures.ncols() > 0 {
            self.factor_exposure(w).norm()
        } else {
            0.0
        };
        Violations {
            leverage: (gross - p.leverage_limit).max(0.0),
            turnover: (turnover - p.turnover_limit).max(0.0),
            net: (w.sum() - p.net_target).abs(),
            factor,
        }
    }
}
