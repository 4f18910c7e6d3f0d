//! Order lifecycle management.
//!
//! Orders move only on confirmed facts (dispatch result, ack, fill, cancel
//! ack, reject). A confirmed fill always outranks a cancel. The position
//! ledger lives here and changes only when a fill is applied; everything
//! else sees [`LedgerSnapshot`] copies.

pub mod desk;
pub mod ledger;
pub mod manager;
pub mod reconcile;
pub mod safety;
pub mod state;

pub use desk::LiveOrderDesk;
pub use ledger::{LedgerSnapshot, PositionLedger};
pub use manager::{plan_intents, OrderIntent, OrderLifecycleManager, SubmitOutcome};
pub use reconcile::{diff_positions, ReconciliationDiscrepancy};
pub use safety::{SafetyGate, SafetyRejection};
pub use state::{AppliedFill, ReportOutcome};

use crate::domain::{ExecutionReport, Order, OrderId, SecurityId, Timestamp};
use crate::execution::ExecutionCost;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OlmError {
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("fill of {quantity} on {order_id} exceeds remaining {remaining}")]
    Overfill {
        order_id: OrderId,
        quantity: u64,
        remaining: u64,
    },
    #[error("fill for {got} on {order_id}, which trades {expected}")]
    SecurityMismatch {
        order_id: OrderId,
        expected: SecurityId,
        got: SecurityId,
    },
    #[error("{event} not valid for {order_id} in state {state}")]
    InvalidTransition {
        order_id: OrderId,
        state: String,
        event: &'static str,
    },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Market inputs an execution backend prices an order against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketContext {
    pub price: f64,
    /// Daily return volatility.
    pub volatility: f64,
    /// Average daily volume in shares.
    pub adv: Option<f64>,
    /// Normalized intraday volume profile.
    pub volume_curve: Option<Vec<f64>>,
}

/// An execution report due at a future instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledReport {
    pub at: Timestamp,
    pub report: ExecutionReport,
}

/// Where orders go once they pass the safety gate: the simulator in
/// backtests, a broker adapter live.
pub trait ExecutionBackend: Send {
    fn name(&self) -> &str;

    /// Accept an order. Returned reports are delivered through the clock.
    fn dispatch(
        &mut self,
        order: &Order,
        ctx: &MarketContext,
        now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError>;

    /// Ask to cancel; the venue answers with a cancel ack (or not at all).
    fn request_cancel(&mut self, order_id: OrderId, now: Timestamp) -> Vec<ScheduledReport>;

    /// Called as a scheduled report comes due. `None` withdraws it.
    fn release(&mut self, report: ExecutionReport) -> Option<ExecutionReport> {
        Some(report)
    }

    /// The venue's own view of positions, when it keeps one.
    fn broker_positions(&self) -> Option<BTreeMap<SecurityId, i64>> {
        None
    }

    /// Implementation costs of fills delivered since the last call.
    fn drain_costs(&mut self) -> Vec<ExecutionCost> {
        Vec::new()
    }
}
