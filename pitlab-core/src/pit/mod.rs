//! Point-in-time access.
//!
//! Every read is resolved as of the gateway's current instant: rows whose
//! knowledge_time lies after it are invisible, later corrections of a row
//! replace earlier ones only once they are known, and corporate-action
//! adjustment is computed on the way out without touching stored bars.

pub mod adjust;
pub mod gateway;

pub use adjust::adjust_series;
pub use gateway::{
    CovarianceView, ExposureView, IngestSummary, PitGateway, PriceView,
};

use crate::clock::ClockError;
use crate::contracts::ContractError;
use crate::domain::{SecurityId, Timestamp};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PitError {
    #[error(transparent)]
    Causality(#[from] ClockError),
    #[error("store error: {0}")]
    Store(#[from] ContractError),
    #[error("no risk model visible for {date} as of {as_of}")]
    NoRiskModel { date: NaiveDate, as_of: Timestamp },
    #[error("data gap for {security}: no usable bar as of {as_of}")]
    DataGap {
        security: SecurityId,
        as_of: Timestamp,
    },
}
