//! Forecasts in, target weights out.

use super::ids::SecurityId;
use super::instant::{Instant, Stamped, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WeightsError {
    #[error("weight {weight} for {security} outside [-1, 1]")]
    OutOfRange { security: SecurityId, weight: f64 },
    #[error("non-finite weight for {0}")]
    NonFinite(SecurityId),
}

/// Residual expected-return forecasts published at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSet {
    pub stamp: Instant,
    pub values: BTreeMap<SecurityId, f64>,
}

impl ForecastSet {
    pub fn new(stamp: Instant, values: BTreeMap<SecurityId, f64>) -> Self {
        Self { stamp, values }
    }
}

impl Stamped for ForecastSet {
    fn stamp(&self) -> Instant {
        self.stamp
    }
}

/// Solver output for one rebalance timestamp. Every weight lies in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWeights {
    pub timestamp: Timestamp,
    weights: BTreeMap<SecurityId, f64>,
}

impl TargetWeights {
    pub fn new(
        timestamp: Timestamp,
        weights: BTreeMap<SecurityId, f64>,
    ) -> Result<Self, WeightsError> {
        for (&security, &weight) in &weights {
            if !weight.is_finite() {
                return Err(WeightsError::NonFinite(security));
            }
            if !(-1.0..=1.0).contains(&weight) {
                return Err(WeightsError::OutOfRange { security, weight });
            }
        }
        Ok(Self { timestamp, weights })
    }

    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            weights: BTreeMap::new(),
        }
    }

    /// The same weights published under another timestamp.
    pub fn restamped(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            weights: self.weights.clone(),
        }
    }

    pub fn get(&self, id: SecurityId) -> f64 {
        self.weights.get(&id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SecurityId, f64)> + '_ {
        self.weights.iter().map(|(&k, &v)| (k, v))
    }

    pub fn as_map(&self) -> &BTreeMap<SecurityId, f64> {
        &self.weights
    }

    pub fn gross(&self) -> f64 {
        self.weights.values().map(|w| w.abs()).sum()
    }

    pub fn net(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// Weight change for one security at one rebalance; orders link back to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightDelta {
    pub rebalance_at: Timestamp,
    pub from: f64,
    pub to: f64,
}

impl WeightDelta {
    pub fn new(rebalance_at: Timestamp, from: f64, to: f64) -> Self {
        Self {
            rebalance_at,
            from,
            to,
        }
    }

    pub fn delta(&self) -> f64 {
        self.to - self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn rejects_out_of_range() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let w = BTreeMap::from([(SecurityId(1), 1.5)]);
        assert!(matches!(
            TargetWeights::new(t, w),
            Err(WeightsError::OutOfRange { .. })
        ));
    }

    #[test]
    fn gross_and_net() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let w = BTreeMap::from([(SecurityId(1), 0.5), (SecurityId(2), -0.25)]);
        let tw = TargetWeights::new(t, w).unwrap();
        assert!((tw.gross() - 0.75).abs() < 1e-12);
        assert!((tw.net() - 0.25).abs() < 1e-12);
        assert_eq!(tw.get(SecurityId(3)), 0.0);
    }
}
