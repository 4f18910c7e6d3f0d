//! Backtest driver: wires the gateway, the allocation cycle, order lifecycle
//! and the execution backend around one event queue.
//!
//! Everything runs on the calling thread in event order. The only parallel
//! step is per-order market-context estimation, whose results are collected
//! back in intent order before anything is submitted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use pitlab_core::clock::{Event, EventPayload, EventQueue, TimerKind};
use pitlab_core::context::RunContext;
use pitlab_core::contracts::{ExecutionFeedback, FillJournal};
use pitlab_core::domain::{
    ExecutionReport, Instant, RejectReason, SecurityId, TargetWeights, Timestamp,
};
use pitlab_core::execution::ExecutionCost;
use pitlab_core::metrics::MetricsAggregator;
use pitlab_core::olm::{
    ExecutionBackend, OrderLifecycleManager, ReportOutcome, ScheduledReport, SubmitOutcome,
};
use pitlab_core::pit::PitGateway;
use pitlab_core::registry::{ComponentRegistry, RegistryError};
use pitlab_core::risk::RiskSnapshot;
use pitlab_core::EngineError;

use crate::config::{ConfigError, SimConfig};
use crate::cycle::{visible_prices, AllocationCycle, ReplayData};
use crate::metrics::PerformanceStats;
use crate::report::{RunReport, SCHEMA_VERSION};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("component error: {0}")]
    Registry(#[from] RegistryError),
    /// A causality violation: the run cannot be trusted past this point.
    #[error("run halted at {at}: {reason}")]
    Halted { at: Timestamp, reason: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Fatal conditions halt the run; anything else surfaces as an engine error.
fn escalate(at: Timestamp, err: impl Into<EngineError>) -> RunError {
    let err = err.into();
    if err.is_fatal() {
        error!(%at, error = %err, "causality violation, halting run");
        RunError::Halted {
            at,
            reason: err.to_string(),
        }
    } else {
        RunError::Engine(err)
    }
}

/// The previous cycle, kept for return attribution.
struct LastCycle {
    weights: TargetWeights,
    prices: BTreeMap<SecurityId, f64>,
    snapshot: Arc<RiskSnapshot>,
}

pub struct Backtest {
    config: SimConfig,
    context: RunContext,
    queue: EventQueue,
    gateway: PitGateway,
    cycle: AllocationCycle,
    journal: FillJournal,
    olm: OrderLifecycleManager,
    backend: Box<dyn ExecutionBackend>,
    metrics: MetricsAggregator,
    costs: Vec<ExecutionCost>,
    last_cycle: Option<LastCycle>,
    targets: Vec<TargetWeights>,
    rebalances: usize,
    skipped: usize,
}

impl Backtest {
    pub fn new(
        config: SimConfig,
        data: ReplayData,
        registry: &ComponentRegistry,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let context = config.context()?;
        let start = context.start;
        let solver = registry.solver(&config.components.solver, &config.allocation)?;
        let backend = registry.backend(&config.components.backend, &config.simulator, &context)?;

        let mut queue = EventQueue::new(start);
        let end = session_instant(config.run.end, config.schedule.session_close);
        let in_run = |stamp: &Instant| stamp.knowledge_time >= start && stamp.knowledge_time <= end;

        // Replay feed: facts that become known during the run.
        for bar in data.bars.iter().filter(|b| in_run(&b.stamp)) {
            queue
                .schedule(EventPayload::MarketData(bar.clone()), bar.stamp.knowledge_time)
                .map_err(|e| escalate(start, e))?;
        }
        for action in data.actions.iter().filter(|a| in_run(&a.stamp)) {
            queue
                .schedule(
                    EventPayload::CorporateAction(action.clone()),
                    action.stamp.knowledge_time,
                )
                .map_err(|e| escalate(start, e))?;
        }
        schedule_sessions(&mut queue, &config).map_err(|e| escalate(start, e))?;

        let mut gateway = PitGateway::in_memory(config.pit.clone(), start);
        let mut cycle = AllocationCycle::new(&config, solver, start);
        cycle.load(&mut gateway, data)?;

        let olm = OrderLifecycleManager::new(
            config.olm.clone(),
            config.safety.clone(),
            config.run.capital,
        );

        Ok(Self {
            context,
            queue,
            gateway,
            cycle,
            journal: FillJournal::new(),
            olm,
            backend,
            metrics: MetricsAggregator::new(),
            costs: Vec::new(),
            last_cycle: None,
            targets: Vec::new(),
            rebalances: 0,
            skipped: 0,
            config,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Schedule an extra event from an outside producer.
    pub fn inject(&mut self, payload: EventPayload, at: Timestamp) -> Result<u64, RunError> {
        let now = self.queue.now();
        self.queue.schedule(payload, at).map_err(|e| escalate(now, e))
    }

    /// Drain the queue and report. A causality violation ends the run with
    /// [`RunError::Halted`].
    pub fn run(mut self) -> Result<RunReport, RunError> {
        info!(
            run_id = %self.context.run_id.0,
            solver = self.cycle.solver_name(),
            backend = self.backend.name(),
            events = self.queue.len(),
            "backtest started"
        );
        let start = self.context.start;
        let opening = self.olm.ledger_snapshot();
        self.metrics.record_mark(start, &opening, &BTreeMap::new());

        while let Some(event) = self.queue.pop_next() {
            self.gateway
                .advance_to(event.at)
                .map_err(|e| escalate(event.at, e))?;
            self.handle(event)?;
        }

        let report = self.finish();
        info!(
            fills = report.summary.fills,
            degraded = report.summary.degraded_cycles,
            total_return = report.performance.total_return,
            "backtest finished"
        );
        Ok(report)
    }

    fn handle(&mut self, event: Event) -> Result<(), RunError> {
        let at = event.at;
        match event.payload {
            EventPayload::MarketData(bar) => {
                self.gateway
                    .observe("bar", bar.stamp)
                    .map_err(|e| escalate(at, e))?;
            }
            EventPayload::CorporateAction(action) => {
                self.gateway
                    .observe("corporate action", action.stamp)
                    .map_err(|e| escalate(at, e))?;
                info!(security = %action.security_id, action = ?action.action, value = action.value, "corporate action known");
            }
            EventPayload::RebalanceTrigger => self.rebalance(at)?,
            EventPayload::Execution(report) => self.on_execution(report),
            EventPayload::Timer(kind) => self.on_timer(kind, at)?,
        }
        Ok(())
    }

    // ── Rebalance ────────────────────────────────────────────────────

    fn rebalance(&mut self, at: Timestamp) -> Result<(), RunError> {
        let prepared = match self.cycle.prepare(&self.gateway, at) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                self.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(escalate(at, e)),
        };

        let prices = self.mark_prices(at, &prepared.ids)?;
        let equity = self.olm.ledger_snapshot().equity(&prices);

        if let Some(prev) = self.last_cycle.take() {
            self.attribute(at, &prev, &prices);
        }

        let allocated = self
            .cycle
            .allocate(at, &prepared, equity)
            .map_err(|e| escalate(at, e))?;
        if allocated.degraded {
            self.metrics.record_degraded();
        }

        let intents = self
            .olm
            .plan_orders(&allocated.weights, &allocated.prior, &prices, equity);
        let contexts = self
            .cycle
            .market_contexts(&self.gateway, &prepared.snapshot, &prices, &intents)
            .map_err(|e| escalate(at, e))?;

        let mut submitted = 0usize;
        for (intent, ctx) in intents.into_iter().zip(contexts) {
            let result = self
                .olm
                .submit(intent, &ctx, self.backend.as_mut(), at)
                .map_err(|e| escalate(at, e))?;
            match result {
                SubmitOutcome::Submitted { reports, .. } => {
                    submitted += 1;
                    self.schedule_reports(at, reports)?;
                }
                SubmitOutcome::Rejected { reason, .. } => {
                    if matches!(reason, RejectReason::Safety { .. }) {
                        self.metrics.record_rejection();
                    }
                }
            }
        }
        if submitted > 0 {
            let sweep = at + Duration::milliseconds(self.config.olm.ack_timeout_ms);
            self.queue
                .schedule(EventPayload::Timer(TimerKind::AckTimeoutSweep), sweep)
                .map_err(|e| escalate(at, e))?;
        }

        info!(
            %at,
            securities = prepared.snapshot.len(),
            orders = submitted,
            degraded = allocated.degraded,
            "rebalanced"
        );
        self.rebalances += 1;
        self.targets.push(allocated.weights.clone());
        self.last_cycle = Some(LastCycle {
            weights: allocated.weights,
            prices,
            snapshot: prepared.snapshot,
        });
        Ok(())
    }

    /// Attribute the previous cycle's return using prices seen now.
    fn attribute(&mut self, at: Timestamp, prev: &LastCycle, prices: &BTreeMap<SecurityId, f64>) {
        let (weights, returns): (Vec<f64>, Vec<f64>) = prev
            .snapshot
            .ids
            .iter()
            .map(|id| {
                let r = match (prev.prices.get(id), prices.get(id)) {
                    (Some(&p0), Some(&p1)) if p0 > 0.0 => p1 / p0 - 1.0,
                    _ => 0.0,
                };
                (prev.weights.get(*id), r)
            })
            .unzip();
        let a = self
            .metrics
            .attribute(at, &weights, &returns, &prev.snapshot.exposures);
        debug!(%at, total = a.total, factor = a.factor, selection = a.selection, "cycle attributed");
    }

    // ── Execution ────────────────────────────────────────────────────

    fn schedule_reports(
        &mut self,
        now: Timestamp,
        reports: Vec<ScheduledReport>,
    ) -> Result<(), RunError> {
        for r in reports {
            self.queue
                .schedule(EventPayload::Execution(r.report), r.at)
                .map_err(|e| escalate(now, e))?;
        }
        Ok(())
    }

    fn on_execution(&mut self, report: ExecutionReport) {
        let Some(report) = self.backend.release(report) else {
            return;
        };
        match self.olm.on_report(&report) {
            Ok(ReportOutcome::FillApplied(applied)) => {
                self.metrics.record_fill(&applied.fill);
                self.journal.report_fill(applied.fill);
            }
            Ok(ReportOutcome::DuplicateFill) => {
                debug!(order_id = %report.order_id(), "duplicate fill ignored");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(order_id = %report.order_id(), error = %e, "report not applied, left to reconciliation");
            }
        }
        let costs = self.backend.drain_costs();
        self.metrics.record_costs(&costs);
        self.costs.extend(costs);
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn on_timer(&mut self, kind: TimerKind, at: Timestamp) -> Result<(), RunError> {
        match kind {
            TimerKind::SessionClose => {
                let reports = self
                    .olm
                    .cancel_all_open(self.backend.as_mut(), at)
                    .map_err(|e| escalate(at, e))?;
                self.schedule_reports(at, reports)?;
                let ids = self.tracked_ids();
                let prices = self.mark_prices(at, &ids)?;
                self.olm.mark_equity(&prices, at);
                let ledger = self.olm.ledger_snapshot();
                let equity = self.metrics.record_mark(at, &ledger, &prices);
                debug!(%at, equity, "session marked");
            }
            TimerKind::Reconcile => {
                if let Some(broker) = self.backend.broker_positions() {
                    let ids = self.tracked_ids();
                    let prices = self.mark_prices(at, &ids)?;
                    let diffs = self.olm.reconcile(&broker, &prices, at);
                    self.metrics.record_discrepancies(diffs.len());
                }
            }
            TimerKind::AckTimeoutSweep => {
                let timed_out = self.olm.sweep_timeouts(at);
                if !timed_out.is_empty() {
                    info!(%at, count = timed_out.len(), "orders rejected by ack timeout");
                }
            }
            TimerKind::Heartbeat => {}
        }
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Securities worth marking: the configured universe, the last
    /// snapshot's universe, and anything held.
    fn tracked_ids(&self) -> Vec<SecurityId> {
        let mut ids: BTreeSet<SecurityId> = self.config.run.universe.iter().copied().collect();
        if let Some(cycle) = &self.last_cycle {
            ids.extend(cycle.snapshot.ids.iter().copied());
        }
        ids.extend(self.olm.ledger_snapshot().positions.keys().copied());
        ids.into_iter().collect()
    }

    /// Latest visible prices for `ids` plus anything held.
    fn mark_prices(
        &self,
        at: Timestamp,
        ids: &[SecurityId],
    ) -> Result<BTreeMap<SecurityId, f64>, RunError> {
        let held = self.olm.ledger_snapshot().positions.keys().copied().collect::<Vec<_>>();
        visible_prices(&self.gateway, at, ids, held).map_err(|e| escalate(at, e))
    }

    fn finish(self) -> RunReport {
        let mut order_states: BTreeMap<String, usize> = BTreeMap::new();
        for order in self.olm.orders() {
            *order_states.entry(order.state.label().to_string()).or_insert(0) += 1;
        }
        RunReport {
            schema_version: SCHEMA_VERSION,
            run_id: self.context.run_id.clone(),
            seed: self.context.seed,
            solver: self.cycle.solver_name().to_string(),
            backend: self.backend.name().to_string(),
            summary: self.metrics.summary(),
            performance: PerformanceStats::from_curve(self.metrics.equity_curve()),
            equity_curve: self.metrics.equity_curve().to_vec(),
            attributions: self.metrics.attributions().to_vec(),
            fills: self.journal.all().to_vec(),
            costs: self.costs,
            degraded: self.cycle.degraded().to_vec(),
            discrepancies: self.olm.discrepancies().to_vec(),
            order_states,
            final_ledger: self.olm.ledger_snapshot(),
            targets: self.targets,
            rebalances: self.rebalances,
            skipped_rebalances: self.skipped,
        }
    }
}

fn session_instant(date: NaiveDate, time: NaiveTime) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Rebalance triggers, session closes and reconciliation timers for every
/// weekday in the run.
fn schedule_sessions(
    queue: &mut EventQueue,
    config: &SimConfig,
) -> Result<(), pitlab_core::clock::ClockError> {
    let schedule = &config.schedule;
    let mut session = 0u32;
    for date in config.run.start.iter_days() {
        if date > config.run.end {
            break;
        }
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        if session % schedule.rebalance_every == 0 {
            queue.schedule(
                EventPayload::RebalanceTrigger,
                session_instant(date, schedule.rebalance_time),
            )?;
        }
        let close = session_instant(date, schedule.session_close);
        queue.schedule(EventPayload::Timer(TimerKind::SessionClose), close)?;
        if session % schedule.reconcile_every == 0 {
            queue.schedule(EventPayload::Timer(TimerKind::Reconcile), close)?;
        }
        session += 1;
    }
    Ok(())
}
