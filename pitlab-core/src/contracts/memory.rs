//! In-memory reference stores for the six contracts.

use super::{
    AlphaSignal, ContractError, EventData, ExecutionFeedback, MarketData, OrderInstruction,
    RiskData, RiskModel, Subscriber, Topic,
};
use crate::domain::{
    ActionType, Adjustment, Bar, CorporateAction, DateRange, Fill, FillId, ForecastSet,
    SecurityId, Stamped, TargetWeights, TimeRange, Timestamp, UniverseMembership,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

/// Records written ahead of their knowledge time, held back from
/// subscribers until the clock reaches it.
#[derive(Debug)]
struct Backlog<T> {
    pending: Vec<T>,
}

impl<T> Default for Backlog<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T: Stamped> Backlog<T> {
    fn hold(&mut self, item: T) {
        self.pending.push(item);
    }

    /// Publish everything known at `as_of`, in knowledge-time order.
    fn release(&mut self, as_of: Timestamp, topic: &Topic<T>) -> usize {
        let (mut due, later): (Vec<T>, Vec<T>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|x| x.stamp().is_known_at(as_of));
        self.pending = later;
        due.sort_by_key(|x| x.stamp().knowledge_time);
        for item in &due {
            topic.publish(item);
        }
        due.len()
    }
}

// ── Market data ──────────────────────────────────────────────────────

/// Holds raw bars only; adjustment is the gateway's job.
#[derive(Debug, Default)]
pub struct InMemoryMarketData {
    bars: BTreeMap<SecurityId, Vec<Bar>>,
    universe: Vec<UniverseMembership>,
    topic: Topic<Bar>,
    backlog: Backlog<Bar>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bar_count(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }
}

impl MarketData for InMemoryMarketData {
    fn write_bars(&mut self, bars: Vec<Bar>) -> Result<usize, ContractError> {
        if let Some(bar) = bars.iter().find(|b| b.adjustment != Adjustment::Raw) {
            return Err(ContractError::Malformed(format!(
                "{} bar at {} is not raw",
                bar.security_id,
                bar.timestamp()
            )));
        }
        let mut accepted = 0;
        for bar in bars {
            if !self.topic.is_empty() {
                self.backlog.hold(bar.clone());
            }
            let series = self.bars.entry(bar.security_id).or_default();
            let pos = series.partition_point(|b| {
                (b.timestamp(), b.stamp.knowledge_time) <= (bar.timestamp(), bar.stamp.knowledge_time)
            });
            series.insert(pos, bar);
            accepted += 1;
        }
        Ok(accepted)
    }

    fn get_bars(
        &self,
        ids: &[SecurityId],
        range: TimeRange,
        adjustment: Adjustment,
        as_of: Timestamp,
    ) -> Result<Vec<Bar>, ContractError> {
        if adjustment != Adjustment::Raw {
            return Err(ContractError::Unsupported(format!(
                "{adjustment:?} bars are not stored"
            )));
        }
        let mut out = Vec::new();
        for id in ids {
            if let Some(series) = self.bars.get(id) {
                out.extend(
                    series
                        .iter()
                        .filter(|b| range.contains(b.timestamp()) && b.stamp.is_known_at(as_of))
                        .cloned(),
                );
            }
        }
        Ok(out)
    }

    fn release(&mut self, as_of: Timestamp) -> usize {
        self.backlog.release(as_of, &self.topic)
    }

    fn subscribe_bars(&mut self, ids: &[SecurityId], on_bar: Subscriber<Bar>) {
        let wanted: HashSet<SecurityId> = ids.iter().copied().collect();
        self.topic.subscribe(Box::new(move |bar: &Bar| {
            if wanted.contains(&bar.security_id) {
                on_bar(bar);
            }
        }));
    }

    fn write_universe(&mut self, rows: Vec<UniverseMembership>) -> Result<(), ContractError> {
        self.universe.extend(rows);
        Ok(())
    }

    fn get_universe(&self, date: NaiveDate) -> Result<Vec<UniverseMembership>, ContractError> {
        Ok(self
            .universe
            .iter()
            .filter(|m| m.as_of_date <= date)
            .cloned()
            .collect())
    }
}

// ── Corporate actions ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryEventData {
    events: Vec<CorporateAction>,
    topic: Topic<CorporateAction>,
    backlog: Backlog<CorporateAction>,
}

impl InMemoryEventData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventData for InMemoryEventData {
    fn write_events(&mut self, events: Vec<CorporateAction>) -> Result<usize, ContractError> {
        if let Some(bad) = events
            .iter()
            .find(|e| !(e.value.is_finite() && e.value > 0.0))
        {
            return Err(ContractError::Malformed(format!(
                "{:?} for {} has value {}",
                bad.action, bad.security_id, bad.value
            )));
        }
        let n = events.len();
        for event in events {
            if !self.topic.is_empty() {
                self.backlog.hold(event.clone());
            }
            self.events.push(event);
        }
        Ok(n)
    }

    fn release(&mut self, as_of: Timestamp) -> usize {
        self.backlog.release(as_of, &self.topic)
    }

    fn get_events(
        &self,
        types: &[ActionType],
        ids: &[SecurityId],
        range: DateRange,
        as_of: Timestamp,
    ) -> Result<Vec<CorporateAction>, ContractError> {
        Ok(self
            .events
            .iter()
            .filter(|e| types.is_empty() || types.contains(&e.action))
            .filter(|e| ids.is_empty() || ids.contains(&e.security_id))
            .filter(|e| range.contains(e.effective_date) && e.stamp.is_known_at(as_of))
            .cloned()
            .collect())
    }

    fn subscribe_events(&mut self, types: &[ActionType], on_event: Subscriber<CorporateAction>) {
        let wanted: Vec<ActionType> = types.to_vec();
        self.topic.subscribe(Box::new(move |e: &CorporateAction| {
            if wanted.is_empty() || wanted.contains(&e.action) {
                on_event(e);
            }
        }));
    }
}

// ── Risk models ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryRiskData {
    models: Vec<RiskModel>,
}

impl InMemoryRiskData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RiskData for InMemoryRiskData {
    fn write_risk_model(&mut self, model: RiskModel) -> Result<(), ContractError> {
        let n = model.ids.len();
        let k = model.factor_names.len();
        if model.covariance.shape() != (n, n)
            || model.exposures.shape() != (n, k)
            || model.factor_returns.len() != k
        {
            return Err(ContractError::Malformed(format!(
                "risk model for {} has inconsistent dimensions",
                model.date
            )));
        }
        self.models.push(model);
        Ok(())
    }

    fn risk_models(&self, date: NaiveDate) -> Result<Vec<RiskModel>, ContractError> {
        Ok(self
            .models
            .iter()
            .filter(|m| m.date <= date)
            .cloned()
            .collect())
    }
}

// ── Forecasts ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ForecastBook {
    sets: BTreeMap<Timestamp, ForecastSet>,
    topic: Topic<ForecastSet>,
}

impl ForecastBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent set dated at or before `at` that is also known at `at`.
    /// A newer set still in flight never hides an older one already known.
    pub fn latest_known(&self, at: Timestamp) -> Option<ForecastSet> {
        self.sets
            .range(..=at)
            .rev()
            .map(|(_, f)| f)
            .find(|f| f.stamp.is_known_at(at))
            .cloned()
    }
}

impl AlphaSignal for ForecastBook {
    fn submit_forecasts(&mut self, forecasts: ForecastSet) -> Result<(), ContractError> {
        if forecasts.values.values().any(|v| !v.is_finite()) {
            return Err(ContractError::Malformed(format!(
                "non-finite forecast at {}",
                forecasts.stamp.event_time
            )));
        }
        self.topic.publish(&forecasts);
        self.sets.insert(forecasts.stamp.event_time, forecasts);
        Ok(())
    }

    fn get_forecasts(&self, timestamp: Timestamp) -> Option<ForecastSet> {
        self.sets
            .range(..=timestamp)
            .next_back()
            .map(|(_, f)| f.clone())
    }

    fn subscribe_forecasts(&mut self, on_forecast: Subscriber<ForecastSet>) {
        self.topic.subscribe(on_forecast);
    }
}

// ── Target weights ───────────────────────────────────────────────────

/// One immutable `TargetWeights` per timestamp.
#[derive(Debug, Default)]
pub struct TargetWeightBook {
    weights: BTreeMap<Timestamp, TargetWeights>,
    topic: Topic<TargetWeights>,
}

impl TargetWeightBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent weights strictly before `timestamp`.
    pub fn latest_before(&self, timestamp: Timestamp) -> Option<&TargetWeights> {
        self.weights.range(..timestamp).next_back().map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl OrderInstruction for TargetWeightBook {
    fn submit_target_weights(&mut self, weights: TargetWeights) -> Result<(), ContractError> {
        if self.weights.contains_key(&weights.timestamp) {
            return Err(ContractError::AlreadyPublished(weights.timestamp));
        }
        self.topic.publish(&weights);
        self.weights.insert(weights.timestamp, weights);
        Ok(())
    }

    fn get_target_weights(&self, timestamp: Timestamp) -> Option<TargetWeights> {
        self.weights.get(&timestamp).cloned()
    }

    fn subscribe_target_weights(&mut self, on_weights: Subscriber<TargetWeights>) {
        self.topic.subscribe(on_weights);
    }
}

// ── Fills ────────────────────────────────────────────────────────────

/// Append-only fill record, deduplicated by fill id.
#[derive(Debug, Default)]
pub struct FillJournal {
    fills: Vec<Fill>,
    seen: HashSet<FillId>,
    topic: Topic<Fill>,
}

impl FillJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[Fill] {
        &self.fills
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

impl ExecutionFeedback for FillJournal {
    fn report_fill(&mut self, fill: Fill) -> bool {
        if !self.seen.insert(fill.fill_id.clone()) {
            return false;
        }
        self.topic.publish(&fill);
        self.fills.push(fill);
        true
    }

    fn get_fills(&self, start: Timestamp, end: Timestamp) -> Vec<Fill> {
        self.fills
            .iter()
            .filter(|f| f.timestamp >= start && f.timestamp <= end)
            .cloned()
            .collect()
    }

    fn subscribe_fills(&mut self, on_fill: Subscriber<Fill>) {
        self.topic.subscribe(on_fill);
    }
}
