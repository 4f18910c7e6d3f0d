//! The allocation cycle both drivers run at a rebalance trigger.
//!
//! A cycle resolves the universe and the risk snapshot as of the trigger,
//! picks the newest forecast set already known, solves, and publishes the
//! target weights. Sizing and dispatch stay with the driver, which owns the
//! order book.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use pitlab_core::allocation::{AllocationAdapter, ConvexSolver, DegradedAllocation};
use pitlab_core::config::PitConfig;
use pitlab_core::contracts::{
    AlphaSignal, ForecastBook, OrderInstruction, RiskModel, TargetWeightBook,
};
use pitlab_core::domain::{
    Bar, CorporateAction, ForecastSet, Instant, SecurityId, TargetWeights, Timestamp,
    UniverseMembership,
};
use pitlab_core::olm::{MarketContext, OrderIntent};
use pitlab_core::pit::{PitError, PitGateway};
use pitlab_core::risk::{RiskSnapshot, SnapshotBuilder};
use pitlab_core::{Disposition, EngineError};

use crate::config::SimConfig;

/// Reference inputs: history, corporate actions, membership, risk models
/// and forecasts. The backtest also replays the in-run part through the
/// clock at each fact's knowledge time.
#[derive(Debug, Clone, Default)]
pub struct ReplayData {
    pub bars: Vec<Bar>,
    pub actions: Vec<CorporateAction>,
    pub universe: Vec<UniverseMembership>,
    pub risk_models: Vec<RiskModel>,
    pub forecasts: Vec<ForecastSet>,
}

/// Inputs resolved at a trigger, before anything is priced.
pub struct Prepared {
    pub ids: Vec<SecurityId>,
    pub snapshot: Arc<RiskSnapshot>,
    pub forecasts: ForecastSet,
}

/// Published weights for one cycle.
pub struct Allocated {
    pub weights: TargetWeights,
    pub prior: TargetWeights,
    pub degraded: bool,
}

pub struct AllocationCycle {
    universe: Vec<SecurityId>,
    start: Timestamp,
    pit: PitConfig,
    buckets: usize,
    snapshots: SnapshotBuilder,
    adapter: AllocationAdapter,
    forecasts: ForecastBook,
    weights: TargetWeightBook,
}

impl AllocationCycle {
    pub fn new(config: &SimConfig, solver: Box<dyn ConvexSolver>, start: Timestamp) -> Self {
        let adapter = AllocationAdapter::new(solver, config.allocation.clone())
            .with_impact_exponent(config.simulator.impact_exponent);
        Self {
            universe: config.run.universe.clone(),
            start,
            pit: config.pit.clone(),
            buckets: config.simulator.slices,
            snapshots: SnapshotBuilder::new(config.pit.adv_lookback),
            adapter,
            forecasts: ForecastBook::new(),
            weights: TargetWeightBook::new(),
        }
    }

    /// Write reference data into the gateway's stores and the forecast book.
    pub fn load(&mut self, gateway: &mut PitGateway, data: ReplayData) -> Result<(), EngineError> {
        let ingest = gateway.write_bars(data.bars)?;
        if ingest.rejected > 0 {
            warn!(rejected = ingest.rejected, "malformed bars dropped on ingest");
        }
        gateway.write_events(data.actions)?;
        gateway.write_universe(data.universe)?;
        for model in data.risk_models {
            gateway.write_risk_model(model)?;
        }
        for set in data.forecasts {
            self.forecasts.submit_forecasts(set)?;
        }
        Ok(())
    }

    pub fn solver_name(&self) -> &str {
        self.adapter.solver_name()
    }

    pub fn degraded(&self) -> &[DegradedAllocation] {
        self.adapter.degraded()
    }

    /// Resolve the universe, snapshot and forecasts at `at`.
    ///
    /// `Ok(None)` means the cycle is skipped: an empty universe or no risk
    /// model known yet. Anything else that goes wrong is returned.
    pub fn prepare(
        &mut self,
        gateway: &PitGateway,
        at: Timestamp,
    ) -> Result<Option<Prepared>, EngineError> {
        let date = at.date_naive();
        let ids = if self.universe.is_empty() {
            gateway.get_universe(date)?
        } else {
            self.universe.clone()
        };
        if ids.is_empty() {
            warn!(%at, "empty universe, skipping rebalance");
            return Ok(None);
        }

        let snapshot = match self.snapshots.build(gateway, date, &ids) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let err = EngineError::from(e);
                if err.disposition() != Disposition::Recovered {
                    return Err(err);
                }
                warn!(%at, error = %err, "no risk snapshot, skipping rebalance");
                return Ok(None);
            }
        };

        let forecasts = self.forecasts.latest_known(at).unwrap_or_else(|| {
            debug!(%at, "no forecast known yet, allocating on zero alpha");
            ForecastSet::new(Instant::observed(at), BTreeMap::new())
        });

        Ok(Some(Prepared {
            ids,
            snapshot,
            forecasts,
        }))
    }

    /// Solve and publish the weights for `at`. A failed solve falls back to
    /// the prior weights inside the adapter and is flagged `degraded`.
    pub fn allocate(
        &mut self,
        at: Timestamp,
        prepared: &Prepared,
        equity: f64,
    ) -> Result<Allocated, EngineError> {
        let prior = self
            .weights
            .latest_before(at)
            .cloned()
            .unwrap_or_else(|| TargetWeights::empty(self.start));
        let outcome = self
            .adapter
            .allocate(at, &prepared.forecasts, &prepared.snapshot, &prior, equity);
        self.weights.submit_target_weights(outcome.weights.clone())?;
        Ok(Allocated {
            weights: outcome.weights,
            prior,
            degraded: outcome.degraded.is_some(),
        })
    }

    /// Per-order cost inputs, computed in parallel. Results keep intent order.
    pub fn market_contexts(
        &self,
        gateway: &PitGateway,
        snapshot: &RiskSnapshot,
        prices: &BTreeMap<SecurityId, f64>,
        intents: &[OrderIntent],
    ) -> Result<Vec<MarketContext>, PitError> {
        intents
            .par_iter()
            .map(|intent| {
                market_context(
                    gateway,
                    snapshot,
                    prices,
                    intent.security_id,
                    &self.pit,
                    self.buckets,
                )
            })
            .collect()
    }
}

/// Latest visible prices for `ids` plus anything `held`.
pub fn visible_prices(
    gateway: &PitGateway,
    at: Timestamp,
    ids: &[SecurityId],
    held: impl IntoIterator<Item = SecurityId>,
) -> Result<BTreeMap<SecurityId, f64>, PitError> {
    let mut all: BTreeSet<SecurityId> = ids.iter().copied().collect();
    all.extend(held);
    let all: Vec<SecurityId> = all.into_iter().collect();
    let view = gateway.latest_prices(&all)?;
    if !view.missing.is_empty() {
        debug!(%at, missing = view.missing.len(), "unpriced securities");
    }
    Ok(view.prices())
}

fn market_context(
    gateway: &PitGateway,
    snapshot: &RiskSnapshot,
    prices: &BTreeMap<SecurityId, f64>,
    id: SecurityId,
    pit: &PitConfig,
    buckets: usize,
) -> Result<MarketContext, PitError> {
    let volatility = match gateway.volatility(id, pit.vol_lookback)? {
        Some(v) => v,
        None => snapshot
            .index_of(id)
            .map_or(0.0, |i| snapshot.volatility[i]),
    };
    Ok(MarketContext {
        price: prices.get(&id).copied().unwrap_or(0.0),
        volatility,
        adv: gateway.adv(id, pit.adv_lookback)?,
        volume_curve: gateway.volume_curve(id, buckets)?,
    })
}
