//! Shared fixture: three liquid securities, one risk model and one forecast
//! set, all known before a two-week run starting Monday 2024-01-08.

#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, TimeZone, Utc, Weekday};
use nalgebra::DMatrix;
use pitlab_core::contracts::RiskModel;
use pitlab_core::domain::{Bar, ForecastSet, Instant, SecurityId, Timestamp};
use pitlab_runner::{ReplayData, SimConfig};
use std::collections::BTreeMap;

pub const IDS: [SecurityId; 3] = [SecurityId(1), SecurityId(2), SecurityId(3)];

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn close_of(d: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&d.and_hms_opt(21, 0, 0).unwrap())
}

pub fn start() -> NaiveDate {
    date(2024, 1, 8)
}

pub fn end() -> NaiveDate {
    date(2024, 1, 19)
}

fn weekdays(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Daily bars from late November through the end of the run, each known at
/// its close. Prices drift up with a small alternating wiggle.
pub fn bars() -> Vec<Bar> {
    let bases = [100.0, 50.0, 200.0];
    let mut out = Vec::new();
    for (i, d) in weekdays(date(2023, 11, 20), end()).into_iter().enumerate() {
        let wiggle = if i % 2 == 0 { 1.002 } else { 0.998 };
        for (id, base) in IDS.iter().zip(bases) {
            let close = base * (1.0 + 0.0004 * i as f64) * wiggle;
            out.push(Bar::daily(
                *id,
                Instant::observed(close_of(d)),
                close * 0.999,
                close * 1.005,
                close * 0.995,
                close,
                1_000_000.0,
            ));
        }
    }
    out
}

pub fn risk_model() -> RiskModel {
    let known = close_of(date(2024, 1, 5));
    RiskModel {
        date: date(2024, 1, 5),
        stamp: Instant::observed(known),
        ids: IDS.to_vec(),
        covariance: DMatrix::from_row_slice(
            3,
            3,
            &[
                0.0004, 0.0001, 0.0001, //
                0.0001, 0.0004, 0.0001, //
                0.0001, 0.0001, 0.0004,
            ],
        ),
        factor_names: vec!["mkt".into()],
        exposures: DMatrix::from_row_slice(3, 1, &[1.0, 0.8, 1.2]),
        factor_returns: vec![0.0],
    }
}

pub fn forecasts() -> ForecastSet {
    let values: BTreeMap<SecurityId, f64> =
        [(IDS[0], 0.002), (IDS[1], -0.0015), (IDS[2], 0.001)].into_iter().collect();
    ForecastSet::new(Instant::observed(close_of(date(2024, 1, 5))), values)
}

pub fn replay() -> ReplayData {
    ReplayData {
        bars: bars(),
        risk_models: vec![risk_model()],
        forecasts: vec![forecasts()],
        ..ReplayData::default()
    }
}

pub fn config(seed: u64) -> SimConfig {
    let mut config = SimConfig::new(start(), end());
    config.run.seed = seed;
    config.run.universe = IDS.to_vec();
    config
}
