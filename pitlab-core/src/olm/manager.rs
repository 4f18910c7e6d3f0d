//! Single-consumer order lifecycle manager used by the backtest driver.

use super::ledger::{LedgerSnapshot, PositionLedger};
use super::reconcile::{diff_positions, ReconciliationDiscrepancy};
use super::safety::{SafetyGate, SafetyRejection};
use super::state::{self, AppliedFill, ReportOutcome};
use super::{ExecutionBackend, MarketContext, OlmError, ScheduledReport};
use crate::config::{OlmConfig, SafetyConfig};
use crate::domain::{
    ExecutionReport, Order, OrderAuditEntry, OrderId, OrderIdGen, OrderSide, OrderState,
    RejectReason, SecurityId, TargetWeights, Timestamp, WeightDelta,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A sized order not yet created.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub security_id: SecurityId,
    pub side: OrderSide,
    pub quantity: u64,
    pub origin: WeightDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted {
        order_id: OrderId,
        reports: Vec<ScheduledReport>,
    },
    Rejected {
        order_id: OrderId,
        reason: RejectReason,
    },
}

impl SubmitOutcome {
    pub fn order_id(&self) -> OrderId {
        match self {
            SubmitOutcome::Submitted { order_id, .. } | SubmitOutcome::Rejected { order_id, .. } => {
                *order_id
            }
        }
    }
}

#[derive(Debug)]
pub struct OrderLifecycleManager {
    config: OlmConfig,
    orders: BTreeMap<OrderId, Order>,
    ids: OrderIdGen,
    ledger: PositionLedger,
    gate: SafetyGate,
    audit: Vec<OrderAuditEntry>,
    discrepancies: Vec<ReconciliationDiscrepancy>,
}

impl OrderLifecycleManager {
    pub fn new(config: OlmConfig, safety: SafetyConfig, starting_cash: f64) -> Self {
        Self {
            config,
            orders: BTreeMap::new(),
            ids: OrderIdGen::default(),
            ledger: PositionLedger::new(starting_cash),
            gate: SafetyGate::new(safety),
            audit: Vec::new(),
            discrepancies: Vec::new(),
        }
    }

    // ── Sizing ───────────────────────────────────────────────────────

    /// Turn a weight change into order intents, netting out the ledger and
    /// every open order.
    pub fn plan_orders(
        &self,
        targets: &TargetWeights,
        prior: &TargetWeights,
        prices: &BTreeMap<SecurityId, f64>,
        equity: f64,
    ) -> Vec<OrderIntent> {
        plan_intents(
            &self.config,
            targets,
            prior,
            prices,
            equity,
            &self.ledger.snapshot().quantities(),
            &working_quantities(self.open_orders()),
        )
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Create the order, run the safety gate, and dispatch.
    pub fn submit(
        &mut self,
        intent: OrderIntent,
        ctx: &MarketContext,
        backend: &mut dyn ExecutionBackend,
        now: Timestamp,
    ) -> Result<SubmitOutcome, OlmError> {
        let id = self.ids.next_id();
        let mut order = Order::new(
            id,
            intent.security_id,
            intent.side,
            intent.quantity,
            intent.origin,
            now,
        );

        if let Err(rejection) = self.gate.check(intent.security_id, intent.quantity, ctx.adv, now) {
            warn!(order_id = %id, security = %intent.security_id, reason = %rejection, "safety rejection");
            let reason = safety_reason(&rejection);
            state::mark_rejected(&mut order, reason.clone(), now, &mut self.audit);
            self.orders.insert(id, order);
            return Ok(SubmitOutcome::Rejected { order_id: id, reason });
        }

        match backend.dispatch(&order, ctx, now) {
            Ok(reports) => {
                state::mark_submitted(&mut order, now, &mut self.audit)?;
                debug!(order_id = %id, security = %order.security_id, qty = order.quantity, "order dispatched");
                self.orders.insert(id, order);
                Ok(SubmitOutcome::Submitted {
                    order_id: id,
                    reports,
                })
            }
            Err(e) => {
                warn!(order_id = %id, error = %e, "dispatch failed");
                let reason = RejectReason::Broker(e.to_string());
                state::mark_rejected(&mut order, reason.clone(), now, &mut self.audit);
                self.orders.insert(id, order);
                Ok(SubmitOutcome::Rejected { order_id: id, reason })
            }
        }
    }

    // ── Execution facts ──────────────────────────────────────────────

    pub fn on_report(&mut self, report: &ExecutionReport) -> Result<ReportOutcome, OlmError> {
        let order_id = report.order_id();
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OlmError::UnknownOrder(order_id))?;
        apply_report(order, report, &mut self.ledger, &mut self.audit)
    }

    /// Ask the venue to cancel. Orders never dispatched are cancelled locally.
    pub fn request_cancel(
        &mut self,
        order_id: OrderId,
        backend: &mut dyn ExecutionBackend,
        now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OlmError::UnknownOrder(order_id))?;
        if !state::request_cancel(order, now, &mut self.audit)? {
            return Ok(Vec::new());
        }
        if order.submitted_at.is_none() {
            state::apply_cancel_ack(order, now, &mut self.audit);
            return Ok(Vec::new());
        }
        Ok(backend.request_cancel(order_id, now))
    }

    /// Cancel every working order; used at session close.
    pub fn cancel_all_open(
        &mut self,
        backend: &mut dyn ExecutionBackend,
        now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError> {
        let open: Vec<OrderId> = self
            .open_orders()
            .filter(|o| !o.cancel_pending)
            .map(|o| o.id)
            .collect();
        let mut reports = Vec::new();
        for id in open {
            reports.extend(self.request_cancel(id, backend, now)?);
        }
        Ok(reports)
    }

    /// Reject dispatched orders never acknowledged within the ack timeout.
    pub fn sweep_timeouts(&mut self, now: Timestamp) -> Vec<OrderId> {
        let timeout = chrono::Duration::milliseconds(self.config.ack_timeout_ms);
        let mut timed_out = Vec::new();
        for order in self.orders.values_mut() {
            if state::apply_timeout(order, now, timeout, &mut self.audit) {
                warn!(order_id = %order.id, "broker timeout, order rejected");
                timed_out.push(order.id);
            }
        }
        timed_out
    }

    // ── Ledger ───────────────────────────────────────────────────────

    /// Overwrite the ledger with the broker's quantities, recording every
    /// difference.
    pub fn reconcile(
        &mut self,
        broker: &BTreeMap<SecurityId, i64>,
        marks: &BTreeMap<SecurityId, f64>,
        now: Timestamp,
    ) -> Vec<ReconciliationDiscrepancy> {
        let internal = self.ledger.snapshot().quantities();
        let diffs = diff_positions(&internal, broker, now);
        for d in &diffs {
            warn!(
                security = %d.security_id,
                internal = d.internal_qty,
                broker = d.broker_qty,
                "reconciliation discrepancy, broker wins"
            );
            self.ledger
                .overwrite(d.security_id, d.broker_qty, marks.get(&d.security_id).copied());
        }
        if diffs.is_empty() {
            debug!(positions = internal.len(), "ledger reconciled clean");
        } else {
            info!(discrepancies = diffs.len(), "ledger overwritten from broker");
        }
        self.discrepancies.extend(diffs.iter().cloned());
        diffs
    }

    /// Mark equity for the kill switch. Returns the marked equity.
    pub fn mark_equity(&mut self, prices: &BTreeMap<SecurityId, f64>, now: Timestamp) -> f64 {
        let equity = self.ledger.snapshot().equity(prices);
        self.gate.update_equity(equity, now);
        equity
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders still able to receive fills.
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| !o.is_terminal())
    }

    pub fn audit(&self) -> &[OrderAuditEntry] {
        &self.audit
    }

    pub fn discrepancies(&self) -> &[ReconciliationDiscrepancy] {
        &self.discrepancies
    }

    pub fn safety_rejections(&self) -> usize {
        self.gate.rejections()
    }

    pub fn gate_mut(&mut self) -> &mut SafetyGate {
        &mut self.gate
    }
}

/// Signed quantity open orders will still add, per security.
pub(crate) fn working_quantities<'a>(
    orders: impl Iterator<Item = &'a Order>,
) -> BTreeMap<SecurityId, i64> {
    let mut working = BTreeMap::new();
    for o in orders {
        *working.entry(o.security_id).or_insert(0) += o.signed_remaining();
    }
    working
}

/// Size intents for `targets`.
///
/// For each security: target shares (rounded to the lot size) minus the
/// held quantity minus what working orders will still add. Unpriced
/// securities and intents below the minimum size are skipped.
pub fn plan_intents(
    config: &OlmConfig,
    targets: &TargetWeights,
    prior: &TargetWeights,
    prices: &BTreeMap<SecurityId, f64>,
    equity: f64,
    held: &BTreeMap<SecurityId, i64>,
    working: &BTreeMap<SecurityId, i64>,
) -> Vec<OrderIntent> {
    let mut ids: BTreeSet<SecurityId> = targets.as_map().keys().copied().collect();
    ids.extend(held.keys().copied());
    ids.extend(working.keys().copied());

    let lot = config.lot_size.max(1) as f64;
    let mut intents = Vec::new();
    for id in ids {
        let Some(&price) = prices.get(&id).filter(|p| **p > 0.0) else {
            debug!(security = %id, "no price, skipping intent");
            continue;
        };
        let w = targets.get(id);
        let target = ((w * equity / price) / lot).round() * lot;
        let current = held.get(&id).copied().unwrap_or(0);
        let pending = working.get(&id).copied().unwrap_or(0);
        let delta = target as i64 - current - pending;
        let quantity = delta.unsigned_abs();
        if quantity == 0 || quantity < config.min_order_qty {
            continue;
        }
        intents.push(OrderIntent {
            security_id: id,
            side: OrderSide::for_delta(delta),
            quantity,
            origin: WeightDelta::new(targets.timestamp, prior.get(id), w),
        });
    }
    intents
}

fn safety_reason(rejection: &SafetyRejection) -> RejectReason {
    RejectReason::Safety {
        check: rejection.check(),
        detail: rejection.to_string(),
    }
}

/// Apply one report to one order (and the ledger, for fills).
pub(crate) fn apply_report(
    order: &mut Order,
    report: &ExecutionReport,
    ledger: &mut PositionLedger,
    audit: &mut Vec<OrderAuditEntry>,
) -> Result<ReportOutcome, OlmError> {
    match report {
        ExecutionReport::Ack { .. } => {
            state::apply_ack(order)?;
            if matches!(
                order.state,
                OrderState::Rejected {
                    reason: RejectReason::Timeout
                }
            ) {
                warn!(order_id = %order.id, "ack arrived after timeout rejection");
            }
            Ok(ReportOutcome::Acknowledged)
        }
        ExecutionReport::Fill(fill) => {
            if !state::apply_fill(order, fill, audit)? {
                return Ok(ReportOutcome::DuplicateFill);
            }
            let realized_pnl = ledger.apply_fill(fill);
            Ok(ReportOutcome::FillApplied(AppliedFill {
                fill: fill.clone(),
                realized_pnl,
                state: order.state.clone(),
            }))
        }
        ExecutionReport::CancelAck { at, .. } => {
            if state::apply_cancel_ack(order, *at, audit) {
                Ok(ReportOutcome::Cancelled)
            } else {
                Ok(ReportOutcome::Ignored)
            }
        }
        ExecutionReport::Reject { at, reason, .. } => {
            if state::mark_rejected(order, RejectReason::Broker(reason.clone()), *at, audit) {
                warn!(order_id = %order.id, reason = %reason, "broker rejected order");
                Ok(ReportOutcome::Rejected)
            } else {
                Ok(ReportOutcome::Ignored)
            }
        }
    }
}
