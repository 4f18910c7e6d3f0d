use super::fill::Fill;
use super::ids::OrderId;
use super::instant::Timestamp;
use serde::{Deserialize, Serialize};

/// Confirmed fact from the venue about one order. These are the only inputs
/// that move an order's state after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionReport {
    Ack { order_id: OrderId, at: Timestamp },
    Fill(Fill),
    CancelAck { order_id: OrderId, at: Timestamp },
    Reject {
        order_id: OrderId,
        at: Timestamp,
        reason: String,
    },
}

impl ExecutionReport {
    pub fn order_id(&self) -> OrderId {
        match self {
            ExecutionReport::Ack { order_id, .. }
            | ExecutionReport::CancelAck { order_id, .. }
            | ExecutionReport::Reject { order_id, .. } => *order_id,
            ExecutionReport::Fill(f) => f.order_id,
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            ExecutionReport::Ack { at, .. }
            | ExecutionReport::CancelAck { at, .. }
            | ExecutionReport::Reject { at, .. } => *at,
            ExecutionReport::Fill(f) => f.timestamp,
        }
    }
}
