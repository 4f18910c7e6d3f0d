//! Order types and the lifecycle states the order manager drives them through.

use super::ids::{FillId, OrderId, SecurityId};
use super::instant::Timestamp;
use super::weights::WeightDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    /// Side needed to move a position by `delta` shares.
    pub fn for_delta(delta: i64) -> Self {
        if delta >= 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// Pre-dispatch check that refused an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyCheck {
    KillSwitch,
    AdvParticipation,
    MessageRate,
}

impl fmt::Display for SafetyCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyCheck::KillSwitch => "kill_switch",
            SafetyCheck::AdvParticipation => "adv_participation",
            SafetyCheck::MessageRate => "message_rate",
        };
        f.write_str(s)
    }
}

/// Why an order ended in `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Refused by the safety gate; never dispatched.
    Safety { check: SafetyCheck, detail: String },
    /// Refused by the broker or simulator.
    Broker(String),
    /// No acknowledgement before the ack timeout.
    Timeout,
}

/// Order lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Created,
    Submitted,
    PartiallyFilled,
    CancelRequested,
    Filled,
    Cancelled,
    Rejected { reason: RejectReason },
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderState::Created => "CREATED",
            OrderState::Submitted => "SUBMITTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::CancelRequested => "CANCEL_REQUESTED",
            OrderState::Filled => "FILLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected { .. } => "REJECTED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single order. Quantities are whole shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub security_id: SecurityId,
    pub side: OrderSide,
    pub quantity: u64,
    pub filled_quantity: u64,
    pub state: OrderState,
    /// The weight change this order was sized from.
    pub origin: WeightDelta,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    /// Set once the venue acknowledged the order (or any fill arrived).
    pub acknowledged: bool,
    /// Set once a cancel was requested; stays set while fills keep arriving.
    pub cancel_pending: bool,
    /// Set once the venue closed the order by cancel ack, timeout or broker
    /// reject. Late fills still apply; no further quantity is expected.
    #[serde(default)]
    pub venue_closed: bool,
    /// Volume-weighted price over applied fills.
    pub avg_fill_price: f64,
    /// Fill ids already applied, for idempotent delivery.
    pub seen_fills: BTreeSet<FillId>,
}

impl Order {
    pub fn new(
        id: OrderId,
        security_id: SecurityId,
        side: OrderSide,
        quantity: u64,
        origin: WeightDelta,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            security_id,
            side,
            quantity,
            filled_quantity: 0,
            state: OrderState::Created,
            origin,
            created_at,
            submitted_at: None,
            acknowledged: false,
            cancel_pending: false,
            venue_closed: false,
            avg_fill_price: 0.0,
            seen_fills: BTreeSet::new(),
        }
    }

    pub fn remaining_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Remaining quantity signed by side (what the order would still add to the position).
    pub fn signed_remaining(&self) -> i64 {
        self.side.sign() * self.remaining_quantity() as i64
    }

    /// Terminal state, or closed at the venue with a late fill on top.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal() || self.venue_closed
    }

    /// Pre-terminal and dispatched: can still receive fills from the venue.
    pub fn is_working(&self) -> bool {
        !self.venue_closed
            && matches!(
                self.state,
                OrderState::Submitted | OrderState::PartiallyFilled | OrderState::CancelRequested
            )
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub at: Timestamp,
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub reason: String,
}
