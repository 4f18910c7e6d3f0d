//! Forecasts + snapshot → target weights, never failing the cycle.

use super::problem::{AllocationProblem, Violations};
use super::solver::{ConvexSolver, SolveStatus, SolverFailure};
use crate::config::{AllocationConfig, PenaltyConfig};
use crate::domain::{ForecastSet, SecurityId, TargetWeights, Timestamp};
use crate::execution::PowerLawImpact;
use crate::risk::RiskSnapshot;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const BOUND_SLACK: f64 = 1e-9;

/// Per-cycle hook over the configured penalty coefficients.
pub trait PenaltySchedule: Send + Sync {
    fn penalties(&self, at: Timestamp, base: &PenaltyConfig) -> PenaltyConfig;
}

/// Uses the configured coefficients unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPenalties;

impl PenaltySchedule for StaticPenalties {
    fn penalties(&self, _at: Timestamp, base: &PenaltyConfig) -> PenaltyConfig {
        base.clone()
    }
}

/// A cycle whose weights fell back to the previous cycle's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedAllocation {
    pub timestamp: Timestamp,
    pub solver: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub weights: TargetWeights,
    /// `None` when the cycle degraded.
    pub status: Option<SolveStatus>,
    pub degraded: Option<DegradedAllocation>,
    pub violations: Violations,
}

pub struct AllocationAdapter {
    solver: Box<dyn ConvexSolver>,
    config: AllocationConfig,
    schedule: Box<dyn PenaltySchedule>,
    impact_exponent: f64,
    degraded: Vec<DegradedAllocation>,
}

impl AllocationAdapter {
    pub fn new(solver: Box<dyn ConvexSolver>, config: AllocationConfig) -> Self {
        Self {
            solver,
            config,
            schedule: Box::new(StaticPenalties),
            impact_exponent: PowerLawImpact::EXPONENT,
            degraded: Vec::new(),
        }
    }

    /// Participation exponent of the impact model the trades will pay.
    pub fn with_impact_exponent(mut self, exponent: f64) -> Self {
        self.impact_exponent = exponent;
        self
    }

    pub fn with_schedule(mut self, schedule: Box<dyn PenaltySchedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    /// Every degraded cycle so far, in order.
    pub fn degraded(&self) -> &[DegradedAllocation] {
        &self.degraded
    }

    /// Build the problem over `snapshot.ids`.
    pub fn formulate(
        &self,
        at: Timestamp,
        forecasts: &ForecastSet,
        snapshot: &RiskSnapshot,
        prior: &TargetWeights,
        capital: f64,
    ) -> AllocationProblem {
        let n = snapshot.len();
        let alpha = DVector::from_fn(n, |i, _| {
            forecasts
                .values
                .get(&snapshot.ids[i])
                .copied()
                .unwrap_or(0.0)
        });
        let factor_mu = if snapshot.exposures.ncols() == snapshot.factor_returns.len() {
            &snapshot.exposures * &snapshot.factor_returns
        } else {
            DVector::zeros(n)
        };

        let bound = self.config.max_position.clamp(0.0, 1.0);
        let costs = &self.config.costs;
        let p = self.impact_exponent;
        let impact = DVector::from_fn(n, |i, _| {
            let scale = snapshot
                .adv_dollars(i)
                .map(|adv| (capital.max(0.0) / adv).powf(p))
                .unwrap_or(1.0);
            costs.impact_eta * snapshot.volatility[i] * scale
        });

        AllocationProblem {
            mu: alpha + factor_mu,
            sigma: snapshot.covariance.clone(),
            risk_aversion: self.config.risk_aversion,
            w_prev: DVector::from_fn(n, |i, _| prior.get(snapshot.ids[i])),
            lower: DVector::from_element(n, -bound),
            upper: DVector::from_element(n, bound),
            linear_cost: DVector::from_element(n, costs.linear_bps / 10_000.0),
            impact,
            impact_power: 1.0 + p,
            penalties: self.schedule.penalties(at, &self.config.penalties),
            exposures: if snapshot.exposures.nrows() == n {
                snapshot.exposures.clone()
            } else {
                DMatrix::zeros(n, 0)
            },
        }
    }

    /// Solve for `at`. On any failure the prior weights are re-published
    /// for `at` and one degraded event is recorded.
    pub fn allocate(
        &mut self,
        at: Timestamp,
        forecasts: &ForecastSet,
        snapshot: &RiskSnapshot,
        prior: &TargetWeights,
        capital: f64,
    ) -> AllocationOutcome {
        let problem = self.formulate(at, forecasts, snapshot, prior, capital);
        let result = self
            .solver
            .solve(&problem)
            .and_then(|sol| validate(&problem, sol.weights).map(|w| (w, sol.status, sol.iterations)));

        match result {
            Ok((w, status, iterations)) => {
                let map: BTreeMap<SecurityId, f64> = snapshot
                    .ids
                    .iter()
                    .zip(w.iter())
                    .map(|(&id, &x)| (id, x))
                    .collect();
                match TargetWeights::new(at, map) {
                    Ok(weights) => {
                        debug!(solver = self.solver.name(), ?status, iterations, "allocation solved");
                        AllocationOutcome {
                            weights,
                            status: Some(status),
                            degraded: None,
                            violations: problem.violations(&w),
                        }
                    }
                    Err(e) => self.degrade(
                        at,
                        prior,
                        &problem,
                        SolverFailure::NumericalError(e.to_string()),
                    ),
                }
            }
            Err(failure) => self.degrade(at, prior, &problem, failure),
        }
    }

    fn degrade(
        &mut self,
        at: Timestamp,
        prior: &TargetWeights,
        problem: &AllocationProblem,
        failure: SolverFailure,
    ) -> AllocationOutcome {
        warn!(
            solver = self.solver.name(),
            %at,
            reason = %failure,
            "allocation degraded, keeping previous weights"
        );
        let event = DegradedAllocation {
            timestamp: at,
            solver: self.solver.name().to_string(),
            reason: failure.to_string(),
        };
        self.degraded.push(event.clone());
        AllocationOutcome {
            weights: prior.restamped(at),
            status: None,
            degraded: Some(event),
            violations: problem.violations(&problem.w_prev),
        }
    }
}

impl std::fmt::Debug for AllocationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationAdapter")
            .field("solver", &self.solver.name())
            .field("config", &self.config)
            .field("degraded", &self.degraded.len())
            .finish()
    }
}

/// Length, finiteness and bounds of a returned weight vector.
fn validate(problem: &AllocationProblem, w: DVector<f64>) -> Result<DVector<f64>, SolverFailure> {
    if w.len() != problem.n() {
        return Err(SolverFailure::NumericalError(format!(
            "solver returned {} weights for {} securities",
            w.len(),
            problem.n()
        )));
    }
    if w.iter().any(|x| !x.is_finite()) {
        return Err(SolverFailure::NumericalError("non-finite weight".into()));
    }
    for i in 0..w.len() {
        if w[i] < problem.lower[i] - BOUND_SLACK || w[i] > problem.upper[i] + BOUND_SLACK {
            return Err(SolverFailure::NumericalError(format!(
                "weight {} outside [{}, {}]",
                w[i], problem.lower[i], problem.upper[i]
            )));
        }
    }
    Ok(problem.project(&w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::ProjectedGradientSolver;
    use crate::execution::ImpactModel;
    use crate::domain::Instant;
    use chrono::{NaiveDate, TimeZone, Utc};

    struct ScaledNet(f64);

    impl PenaltySchedule for ScaledNet {
        fn penalties(&self, _at: Timestamp, base: &PenaltyConfig) -> PenaltyConfig {
            PenaltyConfig {
                net: self.0,
                ..base.clone()
            }
        }
    }

    fn t() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap()
    }

    fn snapshot() -> RiskSnapshot {
        RiskSnapshot::from_covariance(
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            t(),
            vec![SecurityId(1), SecurityId(2)],
            DMatrix::identity(2, 2),
        )
    }

    fn forecasts() -> ForecastSet {
        ForecastSet::new(
            Instant::observed(t()),
            BTreeMap::from([(SecurityId(1), 0.02), (SecurityId(2), -0.01)]),
        )
    }

    #[test]
    fn penalty_schedule_overrides_configured_coefficients() {
        let adapter = AllocationAdapter::new(
            Box::new(ProjectedGradientSolver::default()),
            AllocationConfig::default(),
        )
        .with_schedule(Box::new(ScaledNet(42.0)));
        let p = adapter.formulate(t(), &forecasts(), &snapshot(), &TargetWeights::empty(t()), 1e6);
        assert_eq!(p.penalties.net, 42.0);
        assert_eq!(p.mu[0], 0.02);
        assert!((p.linear_cost[0] - 0.0005).abs() < 1e-15);
    }

    #[test]
    fn missing_liquidity_uses_unit_impact_scale() {
        let adapter = AllocationAdapter::new(
            Box::new(ProjectedGradientSolver::default()),
            AllocationConfig::default(),
        );
        let p = adapter.formulate(t(), &forecasts(), &snapshot(), &TargetWeights::empty(t()), 1e6);
        assert!((p.impact[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn impact_matches_the_simulated_cost_curve() {
        let exponent = 0.6;
        let adapter = AllocationAdapter::new(
            Box::new(ProjectedGradientSolver::default()),
            AllocationConfig::default(),
        )
        .with_impact_exponent(exponent);
        let mut snap = snapshot();
        let (price, adv, capital) = (50.0, 200_000.0, 1e6);
        snap.adv = vec![Some(adv), Some(adv)];
        snap.prices = vec![Some(price), Some(price)];
        let p = adapter.formulate(t(), &forecasts(), &snap, &TargetWeights::empty(t()), capital);
        assert_eq!(p.impact_power, 1.0 + exponent);

        // Trading dw of capital as one block at participation shares/ADV:
        // total impact / capital = eta * sigma * (capital/ADV$)^p * dw^(1+p).
        let eta = AllocationConfig::default().costs.impact_eta;
        let model = PowerLawImpact::with_exponent(eta, exponent, 0.0);
        let dw = 0.05;
        let shares = dw * capital / price;
        let charged = model.cost(shares / adv, snap.volatility[0], price).impact * shares / capital;
        let planned = p.impact[0] * dw.powf(p.impact_power);
        assert!((charged - planned).abs() < 1e-12 * charged.max(1.0), "{charged} vs {planned}");
    }
}
