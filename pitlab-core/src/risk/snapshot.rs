//! Immutable risk snapshot, memoized per `(as_of_date, universe_hash)`.

use crate::domain::{SecurityId, Timestamp};
use crate::pit::{PitError, PitGateway};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Daily variance assumed when no security in the universe has a covariance row.
const FALLBACK_VARIANCE: f64 = 0.0004;

/// Everything the allocation and cost models need for one rebalance date.
/// Rows follow `ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSnapshot {
    pub as_of_date: NaiveDate,
    /// Knowledge time of the risk model the snapshot was built from.
    pub knowledge_time: Timestamp,
    pub universe_hash: String,
    pub ids: Vec<SecurityId>,
    pub covariance: DMatrix<f64>,
    pub factor_names: Vec<String>,
    pub exposures: DMatrix<f64>,
    pub factor_returns: DVector<f64>,
    /// Average daily volume in shares.
    pub adv: Vec<Option<f64>>,
    /// Daily return volatility, `sqrt(Σ_ii)`.
    pub volatility: Vec<f64>,
    pub prices: Vec<Option<f64>>,
    /// Ids whose covariance row was filled in rather than read.
    pub filled: Vec<SecurityId>,
}

impl RiskSnapshot {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: SecurityId) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    /// ADV in currency units, when both ADV and price are known.
    pub fn adv_dollars(&self, i: usize) -> Option<f64> {
        match (self.adv.get(i).copied().flatten(), self.prices.get(i).copied().flatten()) {
            (Some(adv), Some(px)) if adv > 0.0 && px > 0.0 => Some(adv * px),
            _ => None,
        }
    }

    /// Snapshot from explicit inputs, with no factors and unknown liquidity.
    pub fn from_covariance(
        as_of_date: NaiveDate,
        knowledge_time: Timestamp,
        ids: Vec<SecurityId>,
        covariance: DMatrix<f64>,
    ) -> Self {
        let n = ids.len();
        let volatility = (0..n).map(|i| covariance[(i, i)].max(0.0).sqrt()).collect();
        Self {
            as_of_date,
            knowledge_time,
            universe_hash: universe_hash(&ids),
            covariance,
            factor_names: Vec::new(),
            exposures: DMatrix::zeros(n, 0),
            factor_returns: DVector::zeros(0),
            adv: vec![None; n],
            volatility,
            prices: vec![None; n],
            filled: Vec::new(),
            ids,
        }
    }
}

/// BLAKE3 over the sorted id list.
pub fn universe_hash(ids: &[SecurityId]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort();
    let mut hasher = blake3::Hasher::new();
    for id in sorted {
        hasher.update(&id.0.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Builds snapshots through the PIT gateway and memoizes them.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    cache: HashMap<(NaiveDate, String), Arc<RiskSnapshot>>,
    builds: usize,
    adv_lookback: usize,
}

impl SnapshotBuilder {
    pub fn new(adv_lookback: usize) -> Self {
        Self {
            cache: HashMap::new(),
            builds: 0,
            adv_lookback,
        }
    }

    /// Number of snapshots actually computed (cache misses).
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn build(
        &mut self,
        gateway: &PitGateway,
        date: NaiveDate,
        ids: &[SecurityId],
    ) -> Result<Arc<RiskSnapshot>, PitError> {
        let key = (date, universe_hash(ids));
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(hit));
        }

        let model = gateway.risk_model(date)?;
        let cov = gateway.get_covariance_matrix(date, ids)?;
        let exp = gateway.get_factor_exposures(date, ids)?;
        let prices = gateway.latest_prices(ids)?;

        let mut covariance = cov.matrix;
        let n = ids.len();
        let known: Vec<f64> = (0..n)
            .filter(|&i| !cov.missing.contains(&ids[i]))
            .map(|i| covariance[(i, i)])
            .collect();
        let fill_var = if known.is_empty() {
            FALLBACK_VARIANCE
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        for (i, id) in ids.iter().enumerate() {
            if cov.missing.contains(id) {
                debug!(security = %id, variance = fill_var, "filling missing covariance row");
                covariance[(i, i)] = fill_var;
            }
        }

        let adv = ids
            .iter()
            .map(|&id| gateway.adv(id, self.adv_lookback))
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot = RiskSnapshot {
            as_of_date: date,
            knowledge_time: model.stamp.knowledge_time,
            universe_hash: key.1.clone(),
            ids: ids.to_vec(),
            volatility: (0..n).map(|i| covariance[(i, i)].max(0.0).sqrt()).collect(),
            covariance,
            factor_names: exp.factor_names,
            exposures: exp.matrix,
            factor_returns: DVector::from_vec(exp.factor_returns),
            adv,
            prices: ids.iter().map(|&id| prices.price(id)).collect(),
            filled: cov.missing,
        };

        self.cache.retain(|(d, _), _| *d >= date);
        self.builds += 1;
        let snapshot = Arc::new(snapshot);
        self.cache.insert(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }
}
