//! Performance metrics: pure functions over a marked equity curve.
//!
//! Every metric is a pure function: equity values in, scalar out. The curve
//! holds one mark per session close, so "period" below means one session.

use pitlab_core::metrics::EquityPoint;
use serde::{Deserialize, Serialize};

/// Sessions per year used for annualisation.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Headline statistics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub periods: usize,
}

impl PerformanceStats {
    pub fn from_curve(curve: &[EquityPoint]) -> Self {
        let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
        Self::compute(&equity)
    }

    pub fn compute(equity: &[f64]) -> Self {
        Self {
            total_return: total_return(equity),
            sharpe: sharpe_ratio(equity, 0.0),
            sortino: sortino_ratio(equity, 0.0),
            max_drawdown: max_drawdown(equity),
            current_drawdown: current_drawdown(equity),
            periods: equity.len().saturating_sub(1),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&initial), Some(&last)) if equity.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Annualised Sharpe ratio from per-period returns.
///
/// Returns 0.0 with fewer than two returns or zero variance.
pub fn sharpe_ratio(equity: &[f64], risk_free_rate: f64) -> f64 {
    let excess = excess_returns(equity, risk_free_rate);
    if excess.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&excess) / std * PERIODS_PER_YEAR.sqrt()
}

/// Annualised Sortino ratio (downside deviation only).
pub fn sortino_ratio(equity: &[f64], risk_free_rate: f64) -> f64 {
    let excess = excess_returns(equity, risk_free_rate);
    if excess.len() < 2 {
        return 0.0;
    }
    let downside: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    let downside_std = (downside / excess.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(&excess) / downside_std * PERIODS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &eq in equity {
        peak = peak.max(eq);
        if peak > 0.0 {
            worst = worst.min((eq - peak) / peak);
        }
    }
    worst
}

/// Drawdown of the last mark from the running peak.
pub fn current_drawdown(equity: &[f64]) -> f64 {
    let Some(&last) = equity.last() else {
        return 0.0;
    };
    let peak = equity.iter().copied().fold(f64::MIN, f64::max);
    if peak > 0.0 {
        ((last - peak) / peak).min(0.0)
    } else {
        0.0
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive marks.
pub fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn excess_returns(equity: &[f64], risk_free_rate: f64) -> Vec<f64> {
    let per_period = risk_free_rate / PERIODS_PER_YEAR;
    period_returns(equity).into_iter().map(|r| r - per_period).collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
