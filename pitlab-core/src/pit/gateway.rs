//! The point-in-time gateway.

use super::adjust::adjust_series;
use super::PitError;
use crate::clock::ClockError;
use crate::config::{GapPolicy, PitConfig};
use crate::contracts::{
    EventData, InMemoryEventData, InMemoryMarketData, InMemoryRiskData, MarketData, RiskData,
    RiskModel,
};
use crate::domain::{
    ActionType, Adjustment, Bar, CorporateAction, DateRange, Instant, Interval, SecurityId,
    TimeRange, Timestamp, UniverseMembership,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Outcome of a validated bar write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Latest usable price per security, with gap bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceView {
    pub as_of: Timestamp,
    pub bars: BTreeMap<SecurityId, Bar>,
    /// Securities whose bar was forward-filled.
    pub filled: Vec<SecurityId>,
    /// Securities with no usable bar; left out of `bars`.
    pub missing: Vec<SecurityId>,
}

impl PriceView {
    pub fn price(&self, id: SecurityId) -> Option<f64> {
        self.bars.get(&id).map(|b| b.close)
    }

    pub fn prices(&self) -> BTreeMap<SecurityId, f64> {
        self.bars.iter().map(|(&id, b)| (id, b.close)).collect()
    }
}

/// Covariance restricted to a requested id list.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceView {
    pub ids: Vec<SecurityId>,
    pub matrix: DMatrix<f64>,
    /// Requested ids absent from the model; their rows and columns are zero.
    pub missing: Vec<SecurityId>,
}

/// Factor exposures restricted to a requested id list.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureView {
    pub ids: Vec<SecurityId>,
    pub factor_names: Vec<String>,
    pub matrix: DMatrix<f64>,
    pub factor_returns: Vec<f64>,
    pub missing: Vec<SecurityId>,
}

/// Wraps the market, event and risk stores and resolves every read as of
/// the current instant.
pub struct PitGateway {
    market: Box<dyn MarketData>,
    events: Box<dyn EventData>,
    risk: Box<dyn RiskData>,
    config: PitConfig,
    as_of: Timestamp,
}

impl PitGateway {
    pub fn new(
        market: Box<dyn MarketData>,
        events: Box<dyn EventData>,
        risk: Box<dyn RiskData>,
        config: PitConfig,
        start: Timestamp,
    ) -> Self {
        Self {
            market,
            events,
            risk,
            config,
            as_of: start,
        }
    }

    /// Gateway over empty in-memory stores.
    pub fn in_memory(config: PitConfig, start: Timestamp) -> Self {
        Self::new(
            Box::new(InMemoryMarketData::new()),
            Box::new(InMemoryEventData::new()),
            Box::new(InMemoryRiskData::new()),
            config,
            start,
        )
    }

    pub fn as_of(&self) -> Timestamp {
        self.as_of
    }

    pub fn config(&self) -> &PitConfig {
        &self.config
    }

    /// Follow the clock. The instant never moves backwards. Subscribers of
    /// the stores hear about records once they become knowable.
    pub fn advance_to(&mut self, t: Timestamp) -> Result<(), PitError> {
        if t < self.as_of {
            return Err(ClockError::causality("gateway advance", t, self.as_of).into());
        }
        self.as_of = t;
        self.market.release(t);
        self.events.release(t);
        Ok(())
    }

    /// Check a delivered fact against the current instant.
    pub fn observe(&self, what: &str, stamp: Instant) -> Result<(), PitError> {
        if !stamp.is_known_at(self.as_of) {
            error!(
                what,
                knowledge_time = %stamp.knowledge_time,
                as_of = %self.as_of,
                "fact delivered before it was knowable"
            );
            return Err(
                ClockError::causality(what.to_string(), stamp.knowledge_time, self.as_of).into(),
            );
        }
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Validate and store bars; malformed bars are dropped and counted.
    pub fn write_bars(&mut self, bars: Vec<Bar>) -> Result<IngestSummary, PitError> {
        let (good, bad): (Vec<Bar>, Vec<Bar>) = bars.into_iter().partition(Bar::is_sane);
        for b in &bad {
            warn!(security = %b.security_id, at = %b.timestamp(), "dropping malformed bar");
        }
        let accepted = self.market.write_bars(good)?;
        Ok(IngestSummary {
            accepted,
            rejected: bad.len(),
        })
    }

    pub fn write_events(&mut self, events: Vec<CorporateAction>) -> Result<usize, PitError> {
        Ok(self.events.write_events(events)?)
    }

    pub fn write_universe(&mut self, rows: Vec<UniverseMembership>) -> Result<(), PitError> {
        Ok(self.market.write_universe(rows)?)
    }

    pub fn write_risk_model(&mut self, model: RiskModel) -> Result<(), PitError> {
        Ok(self.risk.write_risk_model(model)?)
    }

    pub fn market_mut(&mut self) -> &mut dyn MarketData {
        self.market.as_mut()
    }

    pub fn events_mut(&mut self) -> &mut dyn EventData {
        self.events.as_mut()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Bars for `ids` with event time in `range`, as known at the current
    /// instant, adjusted on `adjustment` basis.
    ///
    /// Output is grouped by id in request order, then interval, then time.
    pub fn get_bars(
        &self,
        ids: &[SecurityId],
        range: TimeRange,
        adjustment: Adjustment,
    ) -> Result<Vec<Bar>, PitError> {
        let fetch = TimeRange::new(range.start, range.end.max(self.as_of));
        let mut out = Vec::new();
        for &id in ids {
            let raw = self.market.get_bars(&[id], fetch, Adjustment::Raw, self.as_of)?;
            let actions = if adjustment == Adjustment::Raw {
                Vec::new()
            } else {
                self.applicable_actions(id, range.start.date_naive())?
            };
            for series in self.resolve_versions(raw).into_values() {
                let adjusted = adjust_series(&series, &actions, adjustment);
                out.extend(
                    adjusted
                        .into_iter()
                        .filter(|b| range.contains(b.timestamp())),
                );
            }
        }
        Ok(out)
    }

    /// Corporate actions known at the current instant.
    pub fn get_events(
        &self,
        types: &[ActionType],
        ids: &[SecurityId],
        range: DateRange,
    ) -> Result<Vec<CorporateAction>, PitError> {
        let mut events: Vec<CorporateAction> = self
            .events
            .get_events(types, ids, range, self.as_of)?
            .into_iter()
            .filter(|e| e.stamp.is_known_at(self.as_of))
            .collect();
        events.sort_by(|a, b| {
            (a.effective_date, a.security_id, a.action).cmp(&(
                b.effective_date,
                b.security_id,
                b.action,
            ))
        });
        Ok(events)
    }

    /// Tradable ids on `date`: for each security, the most recent membership
    /// row dated on or before `date` that is known now.
    pub fn get_universe(&self, date: NaiveDate) -> Result<Vec<SecurityId>, PitError> {
        let mut latest: BTreeMap<SecurityId, UniverseMembership> = BTreeMap::new();
        for row in self.market.get_universe(date)? {
            if row.as_of_date > date || !row.stamp.is_known_at(self.as_of) {
                continue;
            }
            let newer = latest.get(&row.security_id).map_or(true, |cur| {
                (row.as_of_date, row.stamp.knowledge_time)
                    > (cur.as_of_date, cur.stamp.knowledge_time)
            });
            if newer {
                latest.insert(row.security_id, row);
            }
        }
        Ok(latest
            .into_values()
            .filter(|m| m.member)
            .map(|m| m.security_id)
            .collect())
    }

    /// The most recent risk model dated on or before `date` that is known now.
    pub fn risk_model(&self, date: NaiveDate) -> Result<RiskModel, PitError> {
        self.risk
            .risk_models(date)?
            .into_iter()
            .filter(|m| m.date <= date && m.stamp.is_known_at(self.as_of))
            .max_by_key(|m| (m.date, m.stamp.knowledge_time))
            .ok_or(PitError::NoRiskModel {
                date,
                as_of: self.as_of,
            })
    }

    pub fn get_covariance_matrix(
        &self,
        date: NaiveDate,
        ids: &[SecurityId],
    ) -> Result<CovarianceView, PitError> {
        let model = self.risk_model(date)?;
        let idx: Vec<Option<usize>> = ids.iter().map(|&id| model.index_of(id)).collect();
        let n = ids.len();
        let matrix = DMatrix::from_fn(n, n, |r, c| match (idx[r], idx[c]) {
            (Some(i), Some(j)) => model.covariance[(i, j)],
            _ => 0.0,
        });
        Ok(CovarianceView {
            ids: ids.to_vec(),
            matrix,
            missing: missing_ids(ids, &idx),
        })
    }

    pub fn get_factor_exposures(
        &self,
        date: NaiveDate,
        ids: &[SecurityId],
    ) -> Result<ExposureView, PitError> {
        let model = self.risk_model(date)?;
        let idx: Vec<Option<usize>> = ids.iter().map(|&id| model.index_of(id)).collect();
        let k = model.factor_names.len();
        let matrix = DMatrix::from_fn(ids.len(), k, |r, f| match idx[r] {
            Some(i) => model.exposures[(i, f)],
            None => 0.0,
        });
        Ok(ExposureView {
            ids: ids.to_vec(),
            factor_names: model.factor_names.clone(),
            matrix,
            factor_returns: model.factor_returns.clone(),
            missing: missing_ids(ids, &idx),
        })
    }

    // ── Derived estimates ────────────────────────────────────────────

    /// The last `lookback` visible daily bars for `id`, oldest first.
    pub fn daily_bars(
        &self,
        id: SecurityId,
        lookback: usize,
        adjustment: Adjustment,
    ) -> Result<Vec<Bar>, PitError> {
        let range = TimeRange::new(DateTime::<Utc>::MIN_UTC, self.as_of);
        let mut bars: Vec<Bar> = self
            .get_bars(&[id], range, adjustment)?
            .into_iter()
            .filter(|b| b.interval == Interval::Day)
            .collect();
        let skip = bars.len().saturating_sub(lookback);
        Ok(bars.split_off(skip))
    }

    /// Latest raw price per security, recovering short gaps by forward fill.
    pub fn latest_prices(&self, ids: &[SecurityId]) -> Result<PriceView, PitError> {
        let today = self.as_of.date_naive();
        let mut view = PriceView {
            as_of: self.as_of,
            bars: BTreeMap::new(),
            filled: Vec::new(),
            missing: Vec::new(),
        };
        for &id in ids {
            let Some(last) = self.daily_bars(id, 1, Adjustment::Raw)?.pop() else {
                debug!(security = %id, "no visible bars");
                view.missing.push(id);
                continue;
            };
            let missed = missed_sessions(last.timestamp().date_naive(), today);
            if missed == 0 {
                view.bars.insert(id, last);
            } else if self.config.gap_policy == GapPolicy::ForwardFill
                && missed <= self.config.max_staleness_sessions
            {
                debug!(security = %id, missed, "forward-filling data gap");
                view.bars
                    .insert(id, last.forward_filled(self.as_of, self.as_of));
                view.filled.push(id);
            } else {
                debug!(security = %id, missed, "unrecovered data gap");
                view.missing.push(id);
            }
        }
        Ok(view)
    }

    /// Mean daily share volume over the last `lookback` recorded sessions,
    /// split-adjusted.
    pub fn adv(&self, id: SecurityId, lookback: usize) -> Result<Option<f64>, PitError> {
        let vols: Vec<f64> = self
            .daily_bars(id, lookback, Adjustment::Ratio)?
            .into_iter()
            .filter(|b| !b.is_forward_filled() && b.volume > 0.0)
            .map(|b| b.volume)
            .collect();
        if vols.is_empty() {
            return Ok(None);
        }
        Ok(Some(vols.iter().sum::<f64>() / vols.len() as f64))
    }

    /// Sample standard deviation of daily log returns over `lookback` returns.
    pub fn volatility(&self, id: SecurityId, lookback: usize) -> Result<Option<f64>, PitError> {
        let closes: Vec<f64> = self
            .daily_bars(id, lookback + 1, Adjustment::Ratio)?
            .iter()
            .map(|b| b.close)
            .collect();
        let rets: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        if rets.len() < 2 {
            return Ok(None);
        }
        let mean = rets.iter().sum::<f64>() / rets.len() as f64;
        let var =
            rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rets.len() - 1) as f64;
        Ok(Some(var.sqrt()))
    }

    /// Normalized intraday volume profile from the latest visible session
    /// with intraday bars, resampled into `buckets`.
    pub fn volume_curve(
        &self,
        id: SecurityId,
        buckets: usize,
    ) -> Result<Option<Vec<f64>>, PitError> {
        if buckets == 0 {
            return Ok(None);
        }
        let range = TimeRange::new(DateTime::<Utc>::MIN_UTC, self.as_of);
        let intraday: Vec<Bar> = self
            .get_bars(&[id], range, Adjustment::Raw)?
            .into_iter()
            .filter(|b| b.interval != Interval::Day)
            .collect();
        let Some(session) = intraday.iter().map(|b| b.timestamp().date_naive()).max() else {
            return Ok(None);
        };
        let mut day: Vec<&Bar> = intraday
            .iter()
            .filter(|b| b.timestamp().date_naive() == session)
            .collect();
        day.sort_by_key(|b| b.timestamp());

        let mut curve = vec![0.0; buckets];
        for (j, bar) in day.iter().enumerate() {
            curve[j * buckets / day.len()] += bar.volume;
        }
        let total: f64 = curve.iter().sum();
        if total <= 0.0 {
            return Ok(None);
        }
        Ok(Some(curve.into_iter().map(|v| v / total).collect()))
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Keep only rows known now, and of several versions of the same bar the
    /// one with the latest knowledge time. Series come back sorted by time.
    fn resolve_versions(&self, raw: Vec<Bar>) -> BTreeMap<Interval, Vec<Bar>> {
        let mut latest: BTreeMap<(Interval, Timestamp), Bar> = BTreeMap::new();
        for bar in raw {
            if !bar.stamp.is_known_at(self.as_of) {
                continue;
            }
            let key = (bar.interval, bar.timestamp());
            let newer = latest
                .get(&key)
                .map_or(true, |cur| bar.stamp.knowledge_time >= cur.stamp.knowledge_time);
            if newer {
                latest.insert(key, bar);
            }
        }
        let mut series: BTreeMap<Interval, Vec<Bar>> = BTreeMap::new();
        for ((interval, _), bar) in latest {
            series.entry(interval).or_default().push(bar);
        }
        series
    }

    /// Actions for `id` effective between `from` and today, known now.
    fn applicable_actions(
        &self,
        id: SecurityId,
        from: NaiveDate,
    ) -> Result<Vec<CorporateAction>, PitError> {
        let today = self.as_of.date_naive();
        if from > today {
            return Ok(Vec::new());
        }
        self.get_events(&[], &[id], DateRange::new(from, today))
    }
}

impl std::fmt::Debug for PitGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitGateway")
            .field("as_of", &self.as_of)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn missing_ids(ids: &[SecurityId], idx: &[Option<usize>]) -> Vec<SecurityId> {
    ids.iter()
        .zip(idx)
        .filter(|(_, i)| i.is_none())
        .map(|(&id, _)| id)
        .collect()
}

/// Weekday sessions strictly between `last` and `today`.
fn missed_sessions(last: NaiveDate, today: NaiveDate) -> u32 {
    let mut missed = 0;
    let mut d = last.succ_opt();
    while let Some(day) = d {
        if day >= today {
            break;
        }
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            missed += 1;
        }
        d = day.succ_opt();
    }
    missed
}
