//! Execution cost simulation.
//!
//! - **Schedules**: TWAP/VWAP child slices with seeded start-time jitter
//! - **Impact**: power-law participation cost plus half spread
//! - **Simulator**: venues implementing the order lifecycle's backend seam

pub mod impact;
pub mod schedule;
pub mod simulator;

pub use impact::{ImpactModel, PowerLawImpact, SliceCost, SpreadOnly};
pub use schedule::{apportion, build_schedule, Slice};
pub use simulator::{ImmediateBackend, SimulatedBroker};

use crate::domain::{FillId, OrderId, SecurityId};
use serde::{Deserialize, Serialize};

/// Implementation cost of one delivered fill, in currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub security_id: SecurityId,
    pub quantity: u64,
    pub arrival_price: f64,
    /// Fraction of expected bucket volume; `None` when ADV was unknown.
    pub participation: Option<f64>,
    pub impact: f64,
    pub spread: f64,
}

impl ExecutionCost {
    pub fn total(&self) -> f64 {
        self.impact + self.spread
    }
}
