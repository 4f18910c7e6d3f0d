//! Backtest driver integration tests.
//!
//! Tests:
//! 1. A two-week run trades toward the forecast signs and fills every order
//! 2. Same seed and inputs give an identical report
//! 3. A failing solver degrades exactly once per cycle and never trades
//! 4. No visible risk model skips every rebalance but still marks equity
//! 5. A fact delivered before it is known halts the run
//! 6. Unknown component names fail at construction
//! 7. Rebalance cadence and attribution count follow the schedule
//! 8. One failed solve degrades that cycle alone and keeps the prior weights
//! 9. A forecast set still in flight never hides one already known

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use pitlab_core::allocation::{
    AllocationProblem, ConvexSolver, ProjectedGradientSolver, Solution, SolverFailure,
};
use pitlab_core::clock::EventPayload;
use pitlab_core::domain::{Bar, ForecastSet, Instant};
use pitlab_core::registry::{ComponentRegistry, RegistryError};
use pitlab_runner::{Backtest, ReplayData, RunError, RunReport};

fn run(config: pitlab_runner::SimConfig, data: ReplayData) -> RunReport {
    Backtest::new(config, data, &ComponentRegistry::standard())
        .unwrap()
        .run()
        .unwrap()
}

// ─── 1. Happy path ──────────────────────────────────────────────────

#[test]
fn run_trades_toward_forecast_signs() {
    let report = run(config(7), replay());

    assert_eq!(report.rebalances, 10);
    assert_eq!(report.skipped_rebalances, 0);
    assert!(!report.fills.is_empty());
    assert_eq!(report.summary.fills, report.fills.len());
    assert_eq!(report.costs.len(), report.fills.len());
    assert!(report.degraded.is_empty());

    let ledger = &report.final_ledger;
    assert!(ledger.quantity(IDS[0]) > 0, "positive alpha should be held long");
    assert!(ledger.quantity(IDS[1]) < 0, "negative alpha should be held short");
    assert!(ledger.quantity(IDS[2]) > 0);

    assert!(report.orders_in("FILLED") >= 3);
    assert!(report.order_states.keys().all(|state| state == "FILLED"));
    assert!(report.discrepancies.is_empty());
}

#[test]
fn equity_is_marked_at_start_and_every_close() {
    let report = run(config(7), replay());
    assert_eq!(report.equity_curve.len(), 11);
    assert_eq!(report.equity_curve[0].equity, 1_000_000.0);
    assert!(report
        .equity_curve
        .windows(2)
        .all(|w| w[0].at < w[1].at));
    assert_eq!(report.performance.periods, 10);
}

// ─── 2. Determinism ─────────────────────────────────────────────────

#[test]
fn same_seed_same_report() {
    let a = run(config(42), replay());
    let b = run(config(42), replay());
    assert_eq!(a, b);
}

#[test]
fn seed_changes_run_id() {
    let a = run(config(1), replay());
    let b = run(config(2), replay());
    assert_ne!(a.run_id, b.run_id);
}

// ─── 3. Degraded allocation ─────────────────────────────────────────

struct BrokenSolver;

impl ConvexSolver for BrokenSolver {
    fn name(&self) -> &str {
        "broken"
    }

    fn solve(&self, _problem: &AllocationProblem) -> Result<Solution, SolverFailure> {
        Err(SolverFailure::NumericalError("diverged".into()))
    }
}

#[test]
fn failing_solver_degrades_once_per_cycle() {
    let registry = ComponentRegistry::standard().with_solver("broken", |_| Box::new(BrokenSolver));
    let mut cfg = config(3);
    cfg.components.solver = "broken".into();

    let report = Backtest::new(cfg, replay(), &registry).unwrap().run().unwrap();

    assert_eq!(report.rebalances, 10);
    assert_eq!(report.degraded.len(), 10);
    assert_eq!(report.summary.degraded_cycles, 10);
    assert!(report.degraded.iter().all(|d| d.solver == "broken"));
    assert!(report.fills.is_empty());
    assert!(report.final_ledger.quantities().is_empty());
}

// ─── 4. Missing risk model ──────────────────────────────────────────

#[test]
fn missing_risk_model_skips_rebalances() {
    let data = ReplayData {
        risk_models: Vec::new(),
        ..replay()
    };
    let report = run(config(5), data);

    assert_eq!(report.rebalances, 0);
    assert_eq!(report.skipped_rebalances, 10);
    assert!(report.fills.is_empty());
    assert_eq!(report.equity_curve.len(), 11);
    assert!(report.equity_curve.iter().all(|p| p.equity == 1_000_000.0));
}

// ─── 5. Causality ───────────────────────────────────────────────────

#[test]
fn fact_delivered_before_known_halts_run() {
    let at = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
    let premature = Bar::daily(
        IDS[0],
        Instant::new(at, at + Duration::hours(1)),
        100.0,
        101.0,
        99.0,
        100.5,
        1_000_000.0,
    );
    let mut bt = Backtest::new(config(9), replay(), &ComponentRegistry::standard()).unwrap();
    bt.inject(EventPayload::MarketData(premature), at).unwrap();

    match bt.run() {
        Err(RunError::Halted { at: halted_at, reason }) => {
            assert_eq!(halted_at, at);
            assert!(!reason.is_empty());
        }
        other => panic!("expected a halt, got {other:?}"),
    }
}

#[test]
fn injecting_into_the_past_is_refused() {
    let mut bt = Backtest::new(config(9), replay(), &ComponentRegistry::standard()).unwrap();
    let before_start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert!(bt
        .inject(EventPayload::RebalanceTrigger, before_start)
        .is_err());
}

// ─── 6. Registry ────────────────────────────────────────────────────

#[test]
fn unknown_backend_fails_construction() {
    let mut cfg = config(1);
    cfg.components.backend = "nowhere".into();
    let err = Backtest::new(cfg, replay(), &ComponentRegistry::standard()).err();
    assert!(matches!(
        err,
        Some(RunError::Registry(RegistryError::UnknownBackend(_)))
    ));
}

// ─── 7. Schedule ────────────────────────────────────────────────────

#[test]
fn rebalance_cadence_follows_schedule() {
    let mut cfg = config(11);
    cfg.schedule.rebalance_every = 5;
    let report = run(cfg, replay());

    assert_eq!(report.rebalances, 2);
    assert_eq!(report.attributions.len(), 1);
    assert_eq!(report.equity_curve.len(), 11);
}

#[test]
fn every_cycle_after_the_first_is_attributed() {
    let report = run(config(13), replay());
    assert_eq!(report.attributions.len(), report.rebalances - 1);
    for a in &report.attributions {
        assert!((a.total - (a.factor + a.selection)).abs() < 1e-12);
    }
}

// ─── 8. One degraded cycle ──────────────────────────────────────────

/// Projected gradient, except that call number `fail_on` diverges.
struct FailsOnce {
    inner: ProjectedGradientSolver,
    calls: AtomicUsize,
    fail_on: usize,
}

impl ConvexSolver for FailsOnce {
    fn name(&self) -> &str {
        "fails_once"
    }

    fn solve(&self, problem: &AllocationProblem) -> Result<Solution, SolverFailure> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(SolverFailure::NumericalError("diverged".into()));
        }
        self.inner.solve(problem)
    }
}

#[test]
fn single_failed_solve_keeps_prior_weights() {
    let registry = ComponentRegistry::standard().with_solver("fails_once", |_| {
        Box::new(FailsOnce {
            inner: ProjectedGradientSolver::default(),
            calls: AtomicUsize::new(0),
            fail_on: 1,
        })
    });
    let mut cfg = config(17);
    cfg.components.solver = "fails_once".into();

    let report = Backtest::new(cfg, replay(), &registry).unwrap().run().unwrap();

    assert_eq!(report.rebalances, 10);
    assert_eq!(report.degraded.len(), 1);
    assert_eq!(report.summary.degraded_cycles, 1);
    assert_eq!(report.targets.len(), 10);

    let (first, second) = (&report.targets[0], &report.targets[1]);
    assert!(first.gross() > 0.0);
    assert_eq!(report.degraded[0].timestamp, second.timestamp);
    assert_eq!(second.as_map(), first.as_map());
    assert!(report.final_ledger.quantity(IDS[0]) > 0);
}

// ─── 9. Forecasts in flight ─────────────────────────────────────────

#[test]
fn unknown_newer_forecast_does_not_blank_alpha() {
    let baseline = run(config(19), replay());

    // Dated inside the run, known only after it ends, signs reversed.
    let flipped: BTreeMap<_, _> = forecasts().values.iter().map(|(&id, &v)| (id, -v)).collect();
    let late = ForecastSet::new(
        Instant::new(close_of(date(2024, 1, 8)), close_of(date(2024, 2, 1))),
        flipped,
    );
    let mut data = replay();
    data.forecasts.push(late);
    let report = run(config(19), data);

    assert_eq!(report.targets, baseline.targets);
    assert!(report.final_ledger.quantity(IDS[1]) < 0);
}
