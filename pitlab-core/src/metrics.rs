//! Run metrics aggregated as the simulation progresses.
//!
//! The aggregator only observes: fills, execution costs, equity marks,
//! degraded cycles, safety rejections and reconciliation discrepancies. It
//! never feeds anything back into the run.

use crate::domain::{Fill, SecurityId, Timestamp};
use crate::execution::ExecutionCost;
use crate::olm::LedgerSnapshot;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Equity marked at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: Timestamp,
    pub equity: f64,
    pub cash: f64,
    pub gross_exposure: f64,
    pub realized_pnl: f64,
}

/// Portfolio return over one cycle split into factor and selection parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub at: Timestamp,
    pub total: f64,
    pub factor: f64,
    pub selection: f64,
}

/// Totals at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub fills: usize,
    pub traded_notional: f64,
    /// Traded notional over mean marked equity.
    pub turnover: f64,
    pub fees: f64,
    pub impact_cost: f64,
    pub spread_cost: f64,
    pub realized_pnl: f64,
    pub final_equity: Option<f64>,
    pub degraded_cycles: usize,
    pub safety_rejections: usize,
    pub discrepancies: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    equity: Vec<EquityPoint>,
    attributions: Vec<Attribution>,
    fills: usize,
    traded_notional: f64,
    fees: f64,
    impact_cost: f64,
    spread_cost: f64,
    degraded_cycles: usize,
    safety_rejections: usize,
    discrepancies: usize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fill(&mut self, fill: &Fill) {
        self.fills += 1;
        self.traded_notional += fill.notional();
        self.fees += fill.fees;
    }

    pub fn record_costs(&mut self, costs: &[ExecutionCost]) {
        for c in costs {
            self.impact_cost += c.impact;
            self.spread_cost += c.spread;
        }
    }

    pub fn record_mark(
        &mut self,
        at: Timestamp,
        ledger: &LedgerSnapshot,
        prices: &BTreeMap<SecurityId, f64>,
    ) -> f64 {
        let equity = ledger.equity(prices);
        let gross_exposure = ledger
            .positions
            .values()
            .map(|p| {
                let price = prices.get(&p.security_id).copied().unwrap_or(p.avg_cost);
                p.market_value(price).abs()
            })
            .sum();
        let point = EquityPoint {
            at,
            equity,
            cash: ledger.cash,
            gross_exposure,
            realized_pnl: ledger.realized_pnl,
        };
        // One point per instant; a later mark at the same instant replaces it.
        match self.equity.last_mut() {
            Some(last) if last.at == at => *last = point,
            _ => self.equity.push(point),
        }
        equity
    }

    pub fn record_degraded(&mut self) {
        self.degraded_cycles += 1;
    }

    pub fn record_rejection(&mut self) {
        self.safety_rejections += 1;
    }

    pub fn record_discrepancies(&mut self, count: usize) {
        self.discrepancies += count;
    }

    /// Attribute one cycle's portfolio return.
    ///
    /// Realized security returns are regressed cross-sectionally on the
    /// exposures (`n × k`); the factor part is `wᵀ B f̂`, selection is the
    /// remainder. With no factors, or a singular regression, everything is
    /// selection.
    pub fn attribute(
        &mut self,
        at: Timestamp,
        weights: &[f64],
        returns: &[f64],
        exposures: &DMatrix<f64>,
    ) -> Attribution {
        let attribution = attribute_returns(at, weights, returns, exposures);
        self.attributions.push(attribution);
        attribution
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity
    }

    pub fn attributions(&self) -> &[Attribution] {
        &self.attributions
    }

    pub fn summary(&self) -> MetricsSummary {
        let mean_equity = if self.equity.is_empty() {
            0.0
        } else {
            self.equity.iter().map(|p| p.equity).sum::<f64>() / self.equity.len() as f64
        };
        MetricsSummary {
            fills: self.fills,
            traded_notional: self.traded_notional,
            turnover: if mean_equity > 0.0 {
                self.traded_notional / mean_equity
            } else {
                0.0
            },
            fees: self.fees,
            impact_cost: self.impact_cost,
            spread_cost: self.spread_cost,
            realized_pnl: self.equity.last().map_or(0.0, |p| p.realized_pnl),
            final_equity: self.equity.last().map(|p| p.equity),
            degraded_cycles: self.degraded_cycles,
            safety_rejections: self.safety_rejections,
            discrepancies: self.discrepancies,
        }
    }
}

fn attribute_returns(
    at: Timestamp,
    weights: &[f64],
    returns: &[f64],
    exposures: &DMatrix<f64>,
) -> Attribution {
    let n = weights.len().min(returns.len());
    let total: f64 = weights[..n].iter().zip(&returns[..n]).map(|(w, r)| w * r).sum();

    let regressable = exposures.ncols() > 0 && exposures.nrows() == n && n >= exposures.ncols();
    let factor = if regressable {
        let r = DVector::from_column_slice(&returns[..n]);
        let w = DVector::from_column_slice(&weights[..n]);
        exposures
            .clone()
            .svd(true, true)
            .solve(&r, 1e-12)
            .ok()
            .map(|f| (exposures * f).dot(&w))
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    } else {
        0.0
    };
    Attribution {
        at,
        total,
        factor,
        selection: total - factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FillId, OrderId, OrderSide};
    use crate::olm::PositionLedger;
    use chrono::{TimeZone, Utc};

    fn t() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 21, 0, 0).unwrap()
    }

    #[test]
    fn returns_explained_by_one_factor_are_all_factor() {
        let mut m = MetricsAggregator::new();
        // Returns are exactly 0.01 × exposure.
        let b = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, -1.0]);
        let a = m.attribute(t(), &[0.5, 0.3, 0.2], &[0.01, 0.02, -0.01], &b);
        assert!((a.total - (0.005 + 0.006 - 0.002)).abs() < 1e-12);
        assert!((a.factor - a.total).abs() < 1e-10);
        assert!(a.selection.abs() < 1e-10);
    }

    #[test]
    fn no_factors_means_all_selection() {
        let mut m = MetricsAggregator::new();
        let a = m.attribute(t(), &[1.0], &[0.03], &DMatrix::zeros(1, 0));
        assert_eq!(a.factor, 0.0);
        assert!((a.selection - 0.03).abs() < 1e-12);
        assert_eq!(m.attributions().len(), 1);
    }

    #[test]
    fn fills_and_marks_feed_the_summary() {
        let mut m = MetricsAggregator::new();
        let fill = Fill {
            order_id: OrderId(1),
            fill_id: FillId::new("ord:1-0"),
            security_id: SecurityId(1),
            side: OrderSide::Buy,
            quantity: 100,
            price: 50.0,
            venue: "SIM".into(),
            timestamp: t(),
            fees: 1.0,
        };
        m.record_fill(&fill);
        let mut ledger = PositionLedger::new(10_000.0);
        ledger.apply_fill(&fill);
        let prices = BTreeMap::from([(SecurityId(1), 50.0)]);
        let equity = m.record_mark(t(), &ledger.snapshot(), &prices);
        assert!((equity - 9_999.0).abs() < 1e-9);
        m.record_mark(t(), &ledger.snapshot(), &prices);
        assert_eq!(m.equity_curve().len(), 1);
        assert_eq!(m.equity_curve()[0].gross_exposure, 5_000.0);

        let s = m.summary();
        assert_eq!(s.fills, 1);
        assert_eq!(s.traded_notional, 5_000.0);
        assert_eq!(s.fees, 1.0);
        assert!((s.turnover - 5_000.0 / 9_999.0).abs() < 1e-12);
    }
}
