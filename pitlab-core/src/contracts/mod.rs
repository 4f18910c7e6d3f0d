//! The six narrow contracts the engine consumes and exposes.
//!
//! (1)-(3) are read through the PIT gateway, which re-applies the
//! knowledge-time filter no matter what a store returns. (4)-(6) are the
//! signal and execution hand-off points.

pub mod memory;

pub use memory::{
    FillJournal, ForecastBook, InMemoryEventData, InMemoryMarketData, InMemoryRiskData,
    TargetWeightBook,
};

use crate::domain::{
    ActionType, Adjustment, Bar, CorporateAction, DateRange, Fill, ForecastSet, Instant,
    SecurityId, Stamped, TargetWeights, TimeRange, Timestamp, UniverseMembership,
};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractError {
    #[error("unsupported request: {0}")]
    Unsupported(String),
    #[error("target weights already published for {0}")]
    AlreadyPublished(Timestamp),
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Subscriber callback.
pub type Subscriber<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A list of subscribers notified synchronously on publish.
pub struct Topic<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<T> Topic<T> {
    pub fn subscribe(&mut self, f: Subscriber<T>) {
        self.subscribers.push(f);
    }

    pub fn publish(&self, item: &T) {
        for s in &self.subscribers {
            s(item);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> std::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// One version of a factor risk model for a date.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    pub date: NaiveDate,
    pub stamp: Instant,
    pub ids: Vec<SecurityId>,
    /// n×n covariance of daily returns, rows/cols in `ids` order.
    pub covariance: DMatrix<f64>,
    pub factor_names: Vec<String>,
    /// n×k exposures, rows in `ids` order.
    pub exposures: DMatrix<f64>,
    /// Expected factor returns (length k), commonly zero.
    pub factor_returns: Vec<f64>,
}

impl RiskModel {
    pub fn index_of(&self, id: SecurityId) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }
}

impl Stamped for RiskModel {
    fn stamp(&self) -> Instant {
        self.stamp
    }
}

/// (1) Market data. Stores may hold several knowledge-time versions of a bar.
pub trait MarketData: Send + Sync {
    /// Returns how many bars were accepted.
    fn write_bars(&mut self, bars: Vec<Bar>) -> Result<usize, ContractError>;
    fn get_bars(
        &self,
        ids: &[SecurityId],
        range: TimeRange,
        adjustment: Adjustment,
        as_of: Timestamp,
    ) -> Result<Vec<Bar>, ContractError>;
    /// Notify bar subscribers of everything that became knowable by
    /// `as_of`. Returns how many bars were published.
    fn release(&mut self, as_of: Timestamp) -> usize;
    fn subscribe_bars(&mut self, ids: &[SecurityId], on_bar: Subscriber<Bar>);
    fn write_universe(&mut self, rows: Vec<UniverseMembership>) -> Result<(), ContractError>;
    /// Membership records dated on or before `date`, every version.
    fn get_universe(&self, date: NaiveDate) -> Result<Vec<UniverseMembership>, ContractError>;
}

/// (2) Corporate actions.
pub trait EventData: Send + Sync {
    fn write_events(&mut self, events: Vec<CorporateAction>) -> Result<usize, ContractError>;
    fn get_events(
        &self,
        types: &[ActionType],
        ids: &[SecurityId],
        range: DateRange,
        as_of: Timestamp,
    ) -> Result<Vec<CorporateAction>, ContractError>;
    /// Notify event subscribers of everything knowable by `as_of`.
    fn release(&mut self, as_of: Timestamp) -> usize;
    fn subscribe_events(&mut self, types: &[ActionType], on_event: Subscriber<CorporateAction>);
}

/// (3) Risk models.
pub trait RiskData: Send + Sync {
    fn write_risk_model(&mut self, model: RiskModel) -> Result<(), ContractError>;
    /// Every stored version for dates on or before `date`.
    fn risk_models(&self, date: NaiveDate) -> Result<Vec<RiskModel>, ContractError>;
}

/// (4) Alpha forecasts.
pub trait AlphaSignal: Send + Sync {
    fn submit_forecasts(&mut self, forecasts: ForecastSet) -> Result<(), ContractError>;
    /// Most recent set with `event_time <= timestamp`.
    fn get_forecasts(&self, timestamp: Timestamp) -> Option<ForecastSet>;
    fn subscribe_forecasts(&mut self, on_forecast: Subscriber<ForecastSet>);
}

/// (5) Target weights produced by the allocation step.
pub trait OrderInstruction: Send + Sync {
    fn submit_target_weights(&mut self, weights: TargetWeights) -> Result<(), ContractError>;
    fn get_target_weights(&self, timestamp: Timestamp) -> Option<TargetWeights>;
    fn subscribe_target_weights(&mut self, on_weights: Subscriber<TargetWeights>);
}

/// (6) Execution feedback from a broker or the simulator.
pub trait ExecutionFeedback: Send + Sync {
    /// Returns `false` if the fill id was already recorded.
    fn report_fill(&mut self, fill: Fill) -> bool;
    fn get_fills(&self, start: Timestamp, end: Timestamp) -> Vec<Fill>;
    fn subscribe_fills(&mut self, on_fill: Subscriber<Fill>);
}
