//! Per-order transition functions.
//!
//! Each function takes the order and the audit log, applies at most one
//! transition, and records it. Callers serialize access per order.

use super::OlmError;
use crate::domain::{
    Fill, Order, OrderAuditEntry, OrderState, RejectReason, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A fill that changed an order and the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFill {
    pub fill: Fill,
    pub realized_pnl: f64,
    pub state: OrderState,
}

/// What an execution report did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Acknowledged,
    FillApplied(AppliedFill),
    /// Same fill id seen before; nothing changed.
    DuplicateFill,
    Cancelled,
    Rejected,
    /// Valid but moot, e.g. a cancel ack for a filled order.
    Ignored,
}

fn record(
    order: &mut Order,
    to: OrderState,
    at: Timestamp,
    reason: impl Into<String>,
    audit: &mut Vec<OrderAuditEntry>,
) {
    let from = std::mem::replace(&mut order.state, to.clone());
    audit.push(OrderAuditEntry {
        order_id: order.id,
        at,
        from_state: from,
        to_state: to,
        reason: reason.into(),
    });
}

fn invalid(order: &Order, event: &'static str) -> OlmError {
    OlmError::InvalidTransition {
        order_id: order.id,
        state: order.state.to_string(),
        event,
    }
}

/// `CREATED → SUBMITTED` after a successful dispatch.
pub fn mark_submitted(
    order: &mut Order,
    at: Timestamp,
    audit: &mut Vec<OrderAuditEntry>,
) -> Result<(), OlmError> {
    if order.state != OrderState::Created {
        return Err(invalid(order, "submit"));
    }
    order.submitted_at = Some(at);
    record(order, OrderState::Submitted, at, "dispatched", audit);
    Ok(())
}

/// Any pre-terminal state `→ REJECTED`. Returns `false` if already terminal.
pub fn mark_rejected(
    order: &mut Order,
    reason: RejectReason,
    at: Timestamp,
    audit: &mut Vec<OrderAuditEntry>,
) -> bool {
    if order.is_terminal() {
        return false;
    }
    let why = match &reason {
        RejectReason::Safety { check, detail } => format!("safety {check}: {detail}"),
        RejectReason::Broker(msg) => format!("broker: {msg}"),
        RejectReason::Timeout => "ack timeout".to_string(),
    };
    record(order, OrderState::Rejected { reason }, at, why, audit);
    order.venue_closed = true;
    true
}

/// Venue acknowledgement. Sets the flag; the state does not change.
pub fn apply_ack(order: &mut Order) -> Result<(), OlmError> {
    if order.submitted_at.is_none() {
        return Err(invalid(order, "ack"));
    }
    order.acknowledged = true;
    Ok(())
}

/// Pre-terminal `→ CANCEL_REQUESTED`. Returns `false` when a cancel is
/// already pending.
pub fn request_cancel(
    order: &mut Order,
    at: Timestamp,
    audit: &mut Vec<OrderAuditEntry>,
) -> Result<bool, OlmError> {
    if order.is_terminal() {
        return Err(invalid(order, "cancel request"));
    }
    if order.cancel_pending {
        return Ok(false);
    }
    order.cancel_pending = true;
    record(order, OrderState::CancelRequested, at, "cancel requested", audit);
    Ok(true)
}

/// Apply a confirmed fill.
///
/// Idempotent on `fill_id`. Applies after a cancel request, a cancel ack, a
/// timeout or a broker reject: the fill is the venue's word and wins. Only
/// orders refused by the safety gate (never dispatched) cannot fill.
///
/// A late fill on an order the venue already closed moves it to `FILLED`
/// or `PARTIALLY_FILLED`, but the order stays closed: its remainder is dead
/// and it no longer counts as open.
pub fn apply_fill(
    order: &mut Order,
    fill: &Fill,
    audit: &mut Vec<OrderAuditEntry>,
) -> Result<bool, OlmError> {
    if order.seen_fills.contains(&fill.fill_id) {
        debug!(order_id = %order.id, fill_id = %fill.fill_id, "duplicate fill ignored");
        return Ok(false);
    }
    if fill.security_id != order.security_id {
        return Err(OlmError::SecurityMismatch {
            order_id: order.id,
            expected: order.security_id,
            got: fill.security_id,
        });
    }
    if order.submitted_at.is_none() {
        return Err(invalid(order, "fill"));
    }
    let remaining = order.remaining_quantity();
    if fill.quantity == 0 || fill.quantity > remaining {
        return Err(OlmError::Overfill {
            order_id: order.id,
            quantity: fill.quantity,
            remaining,
        });
    }

    let before = order.filled_quantity as f64 * order.avg_fill_price;
    order.filled_quantity += fill.quantity;
    order.avg_fill_price = (before + fill.notional()) / order.filled_quantity as f64;
    order.acknowledged = true;
    order.seen_fills.insert(fill.fill_id.clone());

    let to = if order.remaining_quantity() == 0 {
        OrderState::Filled
    } else {
        OrderState::PartiallyFilled
    };
    let late = if order.venue_closed { "late " } else { "" };
    let reason = format!("{late}fill {} x{} @ {}", fill.fill_id, fill.quantity, fill.price);
    record(order, to, fill.timestamp, reason, audit);
    Ok(true)
}

/// Venue confirmed the cancel. Pre-terminal orders with quantity left
/// become `CANCELLED`; anything terminal is left alone.
pub fn apply_cancel_ack(
    order: &mut Order,
    at: Timestamp,
    audit: &mut Vec<OrderAuditEntry>,
) -> bool {
    if order.is_terminal() || order.remaining_quantity() == 0 {
        return false;
    }
    let reason = if order.cancel_pending {
        "cancel acknowledged"
    } else {
        "unsolicited cancel"
    };
    record(order, OrderState::Cancelled, at, reason, audit);
    order.venue_closed = true;
    true
}

/// Reject a dispatched order that was never acknowledged within `timeout`.
pub fn apply_timeout(
    order: &mut Order,
    now: Timestamp,
    timeout: chrono::Duration,
    audit: &mut Vec<OrderAuditEntry>,
) -> bool {
    let Some(submitted) = order.submitted_at else {
        return false;
    };
    if order.acknowledged || order.is_terminal() || now < submitted + timeout {
        return false;
    }
    mark_rejected(order, RejectReason::Timeout, now, audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FillId, OrderId, OrderSide, SecurityId, WeightDelta};
    use chrono::{Duration, TimeZone, Utc};

    fn t(s: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap() + Duration::seconds(s)
    }

    fn submitted(qty: u64) -> (Order, Vec<OrderAuditEntry>) {
        let mut audit = Vec::new();
        let mut o = Order::new(
            OrderId(1),
            SecurityId(9),
            OrderSide::Buy,
            qty,
            WeightDelta::new(t(0), 0.0, 0.1),
            t(0),
        );
        mark_submitted(&mut o, t(0), &mut audit).unwrap();
        (o, audit)
    }

    fn fill(id: &str, qty: u64, at: i64) -> Fill {
        Fill {
            order_id: OrderId(1),
            fill_id: FillId::new(id),
            security_id: SecurityId(9),
            side: OrderSide::Buy,
            quantity: qty,
            price: 10.0,
            venue: "SIM".into(),
            timestamp: t(at),
            fees: 0.0,
        }
    }

    #[test]
    fn partial_then_full() {
        let (mut o, mut audit) = submitted(100);
        assert!(apply_fill(&mut o, &fill("a", 40, 1), &mut audit).unwrap());
        assert_eq!(o.state, OrderState::PartiallyFilled);
        assert!(apply_fill(&mut o, &fill("b", 60, 2), &mut audit).unwrap());
        assert_eq!(o.state, OrderState::Filled);
        assert_eq!(audit.len(), 3);
    }

    #[test]
    fn duplicate_fill_is_noop() {
        let (mut o, mut audit) = submitted(100);
        apply_fill(&mut o, &fill("a", 40, 1), &mut audit).unwrap();
        assert!(!apply_fill(&mut o, &fill("a", 40, 1), &mut audit).unwrap());
        assert_eq!(o.filled_quantity, 40);
    }

    #[test]
    fn overfill_is_refused() {
        let (mut o, mut audit) = submitted(100);
        let err = apply_fill(&mut o, &fill("a", 101, 1), &mut audit).unwrap_err();
        assert!(matches!(err, OlmError::Overfill { remaining: 100, .. }));
        assert_eq!(o.state, OrderState::Submitted);
    }

    #[test]
    fn fill_after_cancel_ack_wins() {
        let (mut o, mut audit) = submitted(100);
        request_cancel(&mut o, t(1), &mut audit).unwrap();
        assert!(apply_cancel_ack(&mut o, t(2), &mut audit));
        assert_eq!(o.state, OrderState::Cancelled);
        apply_fill(&mut o, &fill("late", 30, 3), &mut audit).unwrap();
        assert_eq!(o.state, OrderState::PartiallyFilled);
        assert!(o.is_terminal());
        assert!(!o.is_working());
        assert!(audit.last().unwrap().reason.starts_with("late fill"));
    }

    #[test]
    fn late_fill_after_timeout_keeps_order_closed() {
        let (mut o, mut audit) = submitted(100);
        assert!(apply_timeout(&mut o, t(10), Duration::seconds(5), &mut audit));
        apply_fill(&mut o, &fill("late", 100, 11), &mut audit).unwrap();
        assert_eq!(o.state, OrderState::Filled);
        assert!(!mark_rejected(&mut o, RejectReason::Timeout, t(12), &mut audit));
    }

    #[test]
    fn cancel_ack_after_fill_is_ignored() {
        let (mut o, mut audit) = submitted(100);
        request_cancel(&mut o, t(1), &mut audit).unwrap();
        apply_fill(&mut o, &fill("a", 100, 2), &mut audit).unwrap();
        assert!(!apply_cancel_ack(&mut o, t(3), &mut audit));
        assert_eq!(o.state, OrderState::Filled);
    }

    #[test]
    fn timeout_only_for_unacknowledged() {
        let (mut o, mut audit) = submitted(100);
        assert!(!apply_timeout(&mut o, t(1), Duration::seconds(5), &mut audit));
        assert!(apply_timeout(&mut o, t(5), Duration::seconds(5), &mut audit));
        assert!(matches!(
            o.state,
            OrderState::Rejected {
                reason: RejectReason::Timeout
            }
        ));

        let (mut acked, mut audit) = submitted(100);
        apply_ack(&mut acked).unwrap();
        assert!(!apply_timeout(&mut acked, t(60), Duration::seconds(5), &mut audit));
    }

    #[test]
    fn never_dispatched_order_cannot_fill() {
        let mut audit = Vec::new();
        let mut o = Order::new(
            OrderId(1),
            SecurityId(9),
            OrderSide::Buy,
            100,
            WeightDelta::new(t(0), 0.0, 0.1),
            t(0),
        );
        assert!(apply_fill(&mut o, &fill("a", 10, 1), &mut audit).is_err());
    }
}
