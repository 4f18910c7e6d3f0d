//! Live driver: one consumer over a [`LiveClock`], a concurrent
//! [`LiveOrderDesk`], and an execution venue shared with the producers.
//!
//! Producers hold an [`OrderRouter`] (or a bare clock handle) and push market
//! data, rebalance triggers and orders. The session applies everything in
//! clock order until every producer is gone. Market data flows through the
//! point-in-time gateway, and each rebalance trigger runs the same
//! allocation cycle as the backtest before routing orders to the venue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use pitlab_core::clock::{ClockError, EventPayload, LiveClock, LiveClockHandle, TimerKind};
use pitlab_core::domain::{ExecutionReport, OrderId, RejectReason, SecurityId, Timestamp};
use pitlab_core::olm::{
    ExecutionBackend, LedgerSnapshot, LiveOrderDesk, MarketContext, OlmError, OrderIntent,
    ReportOutcome, ScheduledReport,
};
use pitlab_core::pit::PitGateway;
use pitlab_core::registry::{ComponentRegistry, RegistryError};
use pitlab_core::EngineError;

use crate::config::{ConfigError, SimConfig};
use crate::cycle::{visible_prices, AllocationCycle, ReplayData};

#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Olm(#[from] OlmError),
    #[error("live clock has shut down")]
    ClockClosed,
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("component error: {0}")]
    Registry(#[from] RegistryError),
    /// A fact arrived before it was knowable.
    #[error("session halted at {at}: {reason}")]
    Halted { at: Timestamp, reason: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn escalate(at: Timestamp, err: impl Into<EngineError>) -> LiveError {
    let err = err.into();
    if err.is_fatal() {
        error!(%at, error = %err, "causality violation, halting session");
        LiveError::Halted {
            at,
            reason: err.to_string(),
        }
    } else {
        LiveError::Engine(err)
    }
}

type SharedVenue = Arc<Mutex<Box<dyn ExecutionBackend>>>;

/// Result of routing one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Working(OrderId),
    Rejected(RejectReason),
}

/// Producer-side order entry. Cloning shares the desk and venue.
#[derive(Clone)]
pub struct OrderRouter {
    desk: Arc<LiveOrderDesk>,
    venue: SharedVenue,
    handle: LiveClockHandle,
}

impl OrderRouter {
    pub fn desk(&self) -> Arc<LiveOrderDesk> {
        Arc::clone(&self.desk)
    }

    pub fn handle(&self) -> &LiveClockHandle {
        &self.handle
    }

    /// Gate, dispatch and queue the venue's reports for delivery.
    pub async fn submit(
        &self,
        intent: OrderIntent,
        ctx: &MarketContext,
    ) -> Result<Routed, LiveError> {
        let now = Utc::now().max(self.handle.now());
        let (routed, reports) = route(&self.desk, &self.venue, intent, ctx, now).await?;
        for r in reports {
            let at = r.at.max(self.handle.now());
            if !self.handle.submit(EventPayload::Execution(r.report), at)? {
                return Err(LiveError::ClockClosed);
            }
        }
        Ok(routed)
    }

    /// Queue a report that arrived from the venue out of band.
    pub fn deliver(&self, report: ExecutionReport) -> Result<(), LiveError> {
        let at = report.at().max(self.handle.now());
        if self.handle.submit(EventPayload::Execution(report), at)? {
            Ok(())
        } else {
            Err(LiveError::ClockClosed)
        }
    }
}

/// Create, gate and dispatch one order. The venue's reports are returned
/// for the caller to queue.
async fn route(
    desk: &LiveOrderDesk,
    venue: &SharedVenue,
    intent: OrderIntent,
    ctx: &MarketContext,
    now: Timestamp,
) -> Result<(Routed, Vec<ScheduledReport>), LiveError> {
    let order = match desk.create(intent, ctx, now).await {
        Ok(order) => order,
        Err(reason) => return Ok((Routed::Rejected(reason), Vec::new())),
    };
    let dispatched = venue.lock().await.dispatch(&order, ctx, now);
    match dispatched {
        Ok(reports) => {
            desk.dispatched(order.id, Ok(()), now).await?;
            debug!(order_id = %order.id, "order working");
            Ok((Routed::Working(order.id), reports))
        }
        Err(e) => {
            let msg = e.to_string();
            warn!(order_id = %order.id, error = %msg, "venue refused order");
            desk.dispatched(order.id, Err(msg.clone()), now).await?;
            Ok((Routed::Rejected(RejectReason::Broker(msg)), Vec::new()))
        }
    }
}

/// Counters for a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSummary {
    pub events: usize,
    pub fills: usize,
    pub duplicate_fills: usize,
    pub timeouts: usize,
    pub discrepancies: usize,
    pub rebalance_triggers: usize,
    pub rebalances: usize,
    /// Triggers skipped for want of a universe or risk model.
    pub skipped_rebalances: usize,
    pub degraded_cycles: usize,
    pub orders_routed: usize,
    pub safety_rejections: usize,
    pub ledger: LedgerSnapshot,
}

pub struct LiveSession {
    clock: LiveClock,
    gateway: PitGateway,
    cycle: AllocationCycle,
    desk: Arc<LiveOrderDesk>,
    venue: SharedVenue,
    marks: BTreeMap<SecurityId, f64>,
    ack_timeout: chrono::Duration,
}

impl LiveSession {
    /// Build a session and its first router. The session ends once every
    /// router and handle clone has been dropped.
    pub fn new(
        config: &SimConfig,
        venue: Box<dyn ExecutionBackend>,
        registry: &ComponentRegistry,
    ) -> Result<(Self, OrderRouter), LiveError> {
        config.validate()?;
        let solver = registry.solver(&config.components.solver, &config.allocation)?;
        let (clock, handle) = LiveClock::new(Duration::from_millis(config.clock.heartbeat_ms));
        let start = clock.now();
        let desk = Arc::new(LiveOrderDesk::new(
            config.olm.clone(),
            config.safety.clone(),
            config.run.capital,
        ));
        let venue: SharedVenue = Arc::new(Mutex::new(venue));
        let router = OrderRouter {
            desk: Arc::clone(&desk),
            venue: Arc::clone(&venue),
            handle,
        };
        let session = Self {
            clock,
            gateway: PitGateway::in_memory(config.pit.clone(), start),
            cycle: AllocationCycle::new(config, solver, start),
            desk,
            venue,
            marks: BTreeMap::new(),
            ack_timeout: chrono::Duration::milliseconds(config.olm.ack_timeout_ms),
        };
        Ok((session, router))
    }

    /// Load history, risk models and forecasts known before the session.
    pub fn load(&mut self, data: ReplayData) -> Result<(), LiveError> {
        self.cycle.load(&mut self.gateway, data)?;
        Ok(())
    }

    pub async fn run(mut self) -> Result<LiveSummary, LiveError> {
        let venue = self.venue.lock().await.name().to_string();
        info!(%venue, solver = self.cycle.solver_name(), "live session started");
        let mut summary = LiveSummary {
            events: 0,
            fills: 0,
            duplicate_fills: 0,
            timeouts: 0,
            discrepancies: 0,
            rebalance_triggers: 0,
            rebalances: 0,
            skipped_rebalances: 0,
            degraded_cycles: 0,
            orders_routed: 0,
            safety_rejections: 0,
            ledger: self.desk.ledger_snapshot().await,
        };

        while let Some(event) = self.clock.pop_next().await? {
            summary.events += 1;
            let at = event.at;
            self.gateway
                .advance_to(at)
                .map_err(|e| escalate(at, e))?;
            match event.payload {
                EventPayload::MarketData(bar) => {
                    self.gateway
                        .observe("bar", bar.stamp)
                        .map_err(|e| escalate(at, e))?;
                    self.marks.insert(bar.security_id, bar.close);
                    let ingest = self
                        .gateway
                        .write_bars(vec![bar])
                        .map_err(|e| escalate(at, e))?;
                    if ingest.rejected > 0 {
                        warn!(%at, "malformed live bar dropped");
                    }
                }
                EventPayload::CorporateAction(action) => {
                    self.gateway
                        .observe("corporate action", action.stamp)
                        .map_err(|e| escalate(at, e))?;
                    info!(security = %action.security_id, action = ?action.action, "corporate action");
                    self.gateway
                        .write_events(vec![action])
                        .map_err(|e| escalate(at, e))?;
                }
                EventPayload::RebalanceTrigger => {
                    summary.rebalance_triggers += 1;
                    self.rebalance(at, &mut summary).await?;
                }
                EventPayload::Execution(report) => self.on_report(report, &mut summary).await,
                EventPayload::Timer(TimerKind::Heartbeat | TimerKind::AckTimeoutSweep) => {
                    summary.timeouts += self.desk.sweep_timeouts(at).await.len();
                }
                EventPayload::Timer(TimerKind::Reconcile) => {
                    let broker = self.venue.lock().await.broker_positions();
                    if let Some(broker) = broker {
                        let diffs = self.desk.reconcile(&broker, &self.marks, at).await;
                        summary.discrepancies += diffs.len();
                    }
                }
                EventPayload::Timer(TimerKind::SessionClose) => self.close_session(at).await?,
            }
        }

        summary.ledger = self.desk.ledger_snapshot().await;
        info!(
            events = summary.events,
            rebalances = summary.rebalances,
            fills = summary.fills,
            timeouts = summary.timeouts,
            "live session drained"
        );
        Ok(summary)
    }

    /// Run one allocation cycle against the desk and route every intent.
    async fn rebalance(
        &mut self,
        at: Timestamp,
        summary: &mut LiveSummary,
    ) -> Result<(), LiveError> {
        let prepared = match self.cycle.prepare(&self.gateway, at) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                summary.skipped_rebalances += 1;
                return Ok(());
            }
            Err(e) => return Err(escalate(at, e)),
        };

        let ledger = self.desk.ledger_snapshot().await;
        let held: Vec<SecurityId> = ledger.positions.keys().copied().collect();
        let prices = visible_prices(&self.gateway, at, &prepared.ids, held)
            .map_err(|e| escalate(at, e))?;
        let equity = ledger.equity(&prices);

        let allocated = self
            .cycle
            .allocate(at, &prepared, equity)
            .map_err(|e| escalate(at, e))?;
        if allocated.degraded {
            summary.degraded_cycles += 1;
        }

        let intents = self
            .desk
            .plan_orders(&allocated.weights, &allocated.prior, &prices, equity)
            .await;
        let contexts = self
            .cycle
            .market_contexts(&self.gateway, &prepared.snapshot, &prices, &intents)
            .map_err(|e| escalate(at, e))?;

        let mut routed = 0usize;
        for (intent, ctx) in intents.into_iter().zip(contexts) {
            let (outcome, reports) = route(&self.desk, &self.venue, intent, &ctx, at).await?;
            match outcome {
                Routed::Working(_) => routed += 1,
                Routed::Rejected(RejectReason::Safety { .. }) => summary.safety_rejections += 1,
                Routed::Rejected(_) => {}
            }
            self.schedule_reports(reports)?;
        }
        if routed > 0 {
            self.clock.schedule(
                EventPayload::Timer(TimerKind::AckTimeoutSweep),
                at + self.ack_timeout,
            )?;
        }

        info!(
            %at,
            securities = prepared.snapshot.len(),
            orders = routed,
            degraded = allocated.degraded,
            "rebalanced"
        );
        summary.rebalances += 1;
        summary.orders_routed += routed;
        Ok(())
    }

    fn schedule_reports(&mut self, reports: Vec<ScheduledReport>) -> Result<(), LiveError> {
        let now = self.clock.now();
        for r in reports {
            self.clock
                .schedule(EventPayload::Execution(r.report), r.at.max(now))?;
        }
        Ok(())
    }

    async fn on_report(&mut self, report: ExecutionReport, summary: &mut LiveSummary) {
        let Some(report) = self.venue.lock().await.release(report) else {
            return;
        };
        match self.desk.on_report(&report).await {
            Ok(ReportOutcome::FillApplied(_)) => summary.fills += 1,
            Ok(ReportOutcome::DuplicateFill) => summary.duplicate_fills += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(order_id = %report.order_id(), error = %e, "report not applied, left to reconciliation");
            }
        }
    }

    /// Cancel everything still working and mark equity for the kill switch.
    async fn close_session(&mut self, at: Timestamp) -> Result<(), LiveError> {
        for id in self.desk.open_order_ids().await {
            if !self.desk.request_cancel(id, at).await? {
                continue;
            }
            let reports = self.venue.lock().await.request_cancel(id, at);
            self.schedule_reports(reports)?;
        }
        let equity = self.desk.mark_equity(&self.marks, at).await;
        info!(%at, equity, "session closed");
        Ok(())
    }
}
