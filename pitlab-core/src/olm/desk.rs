//! Concurrent order desk for live mode.
//!
//! Each order sits behind its own async mutex, so reports for one order are
//! applied one at a time while different orders proceed in parallel. The
//! ledger has a single mutex. Lock order is always order, then ledger, then
//! audit log.

use super::ledger::{LedgerSnapshot, PositionLedger};
use super::manager::{apply_report, plan_intents, working_quantities, OrderIntent};
use super::reconcile::{diff_positions, ReconciliationDiscrepancy};
use super::safety::SafetyGate;
use super::state::{self, ReportOutcome};
use super::{MarketContext, OlmError};
use crate::config::{OlmConfig, SafetyConfig};
use crate::domain::{
    ExecutionReport, Order, OrderAuditEntry, OrderId, RejectReason, SecurityId, TargetWeights,
    Timestamp,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

#[derive(Debug)]
pub struct LiveOrderDesk {
    config: OlmConfig,
    orders: RwLock<HashMap<OrderId, Arc<Mutex<Order>>>>,
    ledger: Mutex<PositionLedger>,
    gate: Mutex<SafetyGate>,
    audit: Mutex<Vec<OrderAuditEntry>>,
    discrepancies: Mutex<Vec<ReconciliationDiscrepancy>>,
    next_id: AtomicU64,
}

impl LiveOrderDesk {
    pub fn new(config: OlmConfig, safety: SafetyConfig, starting_cash: f64) -> Self {
        Self {
            config,
            orders: RwLock::new(HashMap::new()),
            ledger: Mutex::new(PositionLedger::new(starting_cash)),
            gate: Mutex::new(SafetyGate::new(safety)),
            audit: Mutex::new(Vec::new()),
            discrepancies: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Create an order and run the safety gate. Passing orders come back in
    /// `CREATED`, ready to dispatch; refused orders are recorded as rejected.
    pub async fn create(
        &self,
        intent: OrderIntent,
        ctx: &MarketContext,
        now: Timestamp,
    ) -> Result<Order, RejectReason> {
        let id = OrderId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut order = Order::new(
            id,
            intent.security_id,
            intent.side,
            intent.quantity,
            intent.origin,
            now,
        );
        let verdict = self
            .gate
            .lock()
            .await
            .check(intent.security_id, intent.quantity, ctx.adv, now);

        let result = match verdict {
            Ok(()) => Ok(order.clone()),
            Err(rejection) => {
                warn!(order_id = %id, reason = %rejection, "safety rejection");
                let reason = RejectReason::Safety {
                    check: rejection.check(),
                    detail: rejection.to_string(),
                };
                let mut log = Vec::new();
                state::mark_rejected(&mut order, reason.clone(), now, &mut log);
                self.audit.lock().await.extend(log);
                Err(reason)
            }
        };
        self.orders
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(order)));
        result
    }

    /// Record the outcome of dispatching a created order.
    pub async fn dispatched(
        &self,
        order_id: OrderId,
        result: Result<(), String>,
        now: Timestamp,
    ) -> Result<(), OlmError> {
        let handle = self.handle(order_id).await?;
        let mut order = handle.lock().await;
        let mut log = Vec::new();
        match result {
            Ok(()) => state::mark_submitted(&mut order, now, &mut log)?,
            Err(msg) => {
                state::mark_rejected(&mut order, RejectReason::Broker(msg), now, &mut log);
            }
        }
        drop(order);
        self.audit.lock().await.extend(log);
        Ok(())
    }

    /// Apply an execution report. Serialized per order.
    pub async fn on_report(&self, report: &ExecutionReport) -> Result<ReportOutcome, OlmError> {
        let handle = self.handle(report.order_id()).await?;
        let mut order = handle.lock().await;
        let mut log = Vec::new();
        let outcome = {
            let mut ledger = self.ledger.lock().await;
            apply_report(&mut order, report, &mut ledger, &mut log)?
        };
        drop(order);
        self.audit.lock().await.extend(log);
        Ok(outcome)
    }

    /// Mark an order cancel-requested. Returns `false` if one was pending.
    pub async fn request_cancel(&self, order_id: OrderId, now: Timestamp) -> Result<bool, OlmError> {
        let handle = self.handle(order_id).await?;
        let mut order = handle.lock().await;
        let mut log = Vec::new();
        let requested = state::request_cancel(&mut order, now, &mut log)?;
        drop(order);
        self.audit.lock().await.extend(log);
        Ok(requested)
    }

    pub async fn sweep_timeouts(&self, now: Timestamp) -> Vec<OrderId> {
        let timeout = chrono::Duration::milliseconds(self.config.ack_timeout_ms);
        let handles: Vec<Arc<Mutex<Order>>> = self.orders.read().await.values().cloned().collect();
        let mut timed_out = Vec::new();
        let mut log = Vec::new();
        for handle in handles {
            let mut order = handle.lock().await;
            if state::apply_timeout(&mut order, now, timeout, &mut log) {
                warn!(order_id = %order.id, "broker timeout, order rejected");
                timed_out.push(order.id);
            }
        }
        self.audit.lock().await.extend(log);
        timed_out.sort();
        timed_out
    }

    pub async fn reconcile(
        &self,
        broker: &BTreeMap<SecurityId, i64>,
        marks: &BTreeMap<SecurityId, f64>,
        now: Timestamp,
    ) -> Vec<ReconciliationDiscrepancy> {
        let diffs = {
            let mut ledger = self.ledger.lock().await;
            let diffs = diff_positions(&ledger.snapshot().quantities(), broker, now);
            for d in &diffs {
                warn!(
                    security = %d.security_id,
                    internal = d.internal_qty,
                    broker = d.broker_qty,
                    "reconciliation discrepancy, broker wins"
                );
                ledger.overwrite(d.security_id, d.broker_qty, marks.get(&d.security_id).copied());
            }
            diffs
        };
        self.discrepancies.lock().await.extend(diffs.iter().cloned());
        diffs
    }

    pub async fn mark_equity(&self, prices: &BTreeMap<SecurityId, f64>, now: Timestamp) -> f64 {
        let equity = self.ledger.lock().await.snapshot().equity(prices);
        self.gate.lock().await.update_equity(equity, now);
        equity
    }

    pub async fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().await.snapshot()
    }

    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        let handle = self.orders.read().await.get(&order_id).cloned()?;
        let order = handle.lock().await;
        Some(order.clone())
    }

    /// Size intents against the ledger and every open order, as the
    /// backtest manager does.
    pub async fn plan_orders(
        &self,
        targets: &TargetWeights,
        prior: &TargetWeights,
        prices: &BTreeMap<SecurityId, f64>,
        equity: f64,
    ) -> Vec<OrderIntent> {
        let handles: Vec<Arc<Mutex<Order>>> = self.orders.read().await.values().cloned().collect();
        let mut open = Vec::new();
        for handle in handles {
            let order = handle.lock().await;
            if !order.is_terminal() {
                open.push(order.clone());
            }
        }
        let held = self.ledger.lock().await.snapshot().quantities();
        plan_intents(
            &self.config,
            targets,
            prior,
            prices,
            equity,
            &held,
            &working_quantities(open.iter()),
        )
    }

    pub async fn open_order_ids(&self) -> Vec<OrderId> {
        let handles: Vec<Arc<Mutex<Order>>> = self.orders.read().await.values().cloned().collect();
        let mut ids = Vec::new();
        for handle in handles {
            let order = handle.lock().await;
            if order.is_working() {
                ids.push(order.id);
            }
        }
        ids.sort();
        ids
    }

    pub async fn audit(&self) -> Vec<OrderAuditEntry> {
        self.audit.lock().await.clone()
    }

    pub async fn discrepancies(&self) -> Vec<ReconciliationDiscrepancy> {
        self.discrepancies.lock().await.clone()
    }

    async fn handle(&self, order_id: OrderId) -> Result<Arc<Mutex<Order>>, OlmError> {
        self.orders
            .read()
            .await
            .get(&order_id)
            .cloned()
            .ok_or(OlmError::UnknownOrder(order_id))
    }
}
