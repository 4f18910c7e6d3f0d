//! Bar: the fundamental market data unit.

use super::ids::SecurityId;
use super::instant::{Instant, Stamped, Timestamp};
use serde::{Deserialize, Serialize};

/// Bar sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    Minute,
    Hour,
    Day,
}

/// Corporate-action adjustment basis requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Adjustment {
    /// Prices exactly as recorded.
    Raw,
    /// Multiplicative back-adjustment (splits and dividends as ratios).
    Ratio,
    /// Additive back-adjustment for dividends; splits still adjust by ratio.
    Difference,
}

/// Where a bar came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarOrigin {
    /// Written by the market data collaborator.
    Recorded,
    /// Synthesized by the gap policy from the last visible bar.
    ForwardFilled,
}

/// OHLCV bar keyed by (security, interval, adjustment basis).
///
/// `stamp.event_time` is the bar timestamp; `stamp.knowledge_time` is when
/// the bar (or this correction of it) became available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub security_id: SecurityId,
    pub interval: Interval,
    pub adjustment: Adjustment,
    pub stamp: Instant,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub origin: BarOrigin,
}

impl Bar {
    /// A raw, recorded daily bar.
    #[allow(clippy::too_many_arguments)]
    pub fn daily(
        security_id: SecurityId,
        stamp: Instant,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            security_id,
            interval: Interval::Day,
            adjustment: Adjustment::Raw,
            stamp,
            open,
            high,
            low,
            close,
            volume,
            origin: BarOrigin::Recorded,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.stamp.event_time
    }

    /// Basic OHLCV sanity check: high >= low, high/low bracket open/close,
    /// positive close, non-negative volume.
    pub fn is_sane(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
            && self.volume >= 0.0
    }

    /// Synthesize a zero-volume copy of this bar at `at`, flagged as forward-filled.
    pub fn forward_filled(&self, at: Timestamp, known_at: Timestamp) -> Self {
        Self {
            stamp: Instant::new(at, known_at),
            open: self.close,
            high: self.close,
            low: self.close,
            volume: 0.0,
            origin: BarOrigin::ForwardFilled,
            ..self.clone()
        }
    }

    pub fn is_forward_filled(&self) -> bool {
        self.origin == BarOrigin::ForwardFilled
    }
}

impl Stamped for Bar {
    fn stamp(&self) -> Instant {
        self.stamp
    }
}
