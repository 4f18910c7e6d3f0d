//! Live session tests on the tokio runtime.
//!
//! Tests:
//! 1. A routed order fills through the immediate venue and lands in the ledger
//! 2. A redelivered fill is applied once
//! 3. The fat-finger check refuses oversized orders before dispatch
//! 4. An order the venue never acknowledges is rejected by timeout
//! 5. Reconciliation against the venue's book finds nothing to fix
//! 6. A rebalance trigger allocates on live bars and routes orders
//! 7. A trigger with no risk model known is skipped
//! 8. A live bar stamped in the future halts the session

mod common;

use std::time::Duration;

use chrono::Utc;
use pitlab_core::clock::{EventPayload, TimerKind};
use pitlab_core::config::SimulatorConfig;
use pitlab_core::domain::{
    Bar, ExecutionReport, Fill, FillId, Instant, Order, OrderId, OrderSide, OrderState,
    RejectReason, Timestamp, WeightDelta,
};
use pitlab_core::execution::ImmediateBackend;
use pitlab_core::olm::{ExecutionBackend, MarketContext, OlmError, OrderIntent, ScheduledReport};
use pitlab_core::registry::ComponentRegistry;
use pitlab_runner::{LiveError, LiveSession, Routed, SimConfig};

fn intent(quantity: u64) -> OrderIntent {
    OrderIntent {
        security_id: common::IDS[0],
        side: OrderSide::Buy,
        quantity,
        origin: WeightDelta::new(Utc::now(), 0.0, 0.01),
    }
}

fn ctx() -> MarketContext {
    MarketContext {
        price: 100.0,
        volatility: 0.02,
        adv: Some(1_000_000.0),
        volume_curve: None,
    }
}

fn registry() -> ComponentRegistry {
    ComponentRegistry::standard()
}

fn live_config() -> SimConfig {
    let mut config = common::config(1);
    config.clock.heartbeat_ms = 3_600_000;
    config
}

/// Accepts everything and never answers.
struct SilentVenue;

impl ExecutionBackend for SilentVenue {
    fn name(&self) -> &str {
        "silent"
    }

    fn dispatch(
        &mut self,
        _order: &Order,
        _ctx: &MarketContext,
        _now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError> {
        Ok(Vec::new())
    }

    fn request_cancel(&mut self, _order_id: OrderId, _now: Timestamp) -> Vec<ScheduledReport> {
        Vec::new()
    }
}

// ─── 1. Fill path ───────────────────────────────────────────────────

#[tokio::test]
async fn routed_order_fills_into_ledger() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();
    let desk = router.desk();

    let routed = router.submit(intent(100), &ctx()).await.unwrap();
    let Routed::Working(id) = routed else {
        panic!("expected a working order, got {routed:?}");
    };
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.fills, 1);
    assert_eq!(summary.ledger.quantity(common::IDS[0]), 100);
    assert_eq!(desk.order(id).await.unwrap().state, OrderState::Filled);
}

// ─── 2. Duplicate delivery ──────────────────────────────────────────

#[tokio::test]
async fn redelivered_fill_applies_once() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();

    let Routed::Working(id) = router.submit(intent(100), &ctx()).await.unwrap() else {
        panic!("order not working");
    };
    let copy = Fill {
        order_id: id,
        fill_id: FillId::new(format!("{id}-0")),
        security_id: common::IDS[0],
        side: OrderSide::Buy,
        quantity: 100,
        price: 100.0,
        venue: "IMMEDIATE".into(),
        timestamp: Utc::now(),
        fees: 0.0,
    };
    router.deliver(ExecutionReport::Fill(copy)).unwrap();
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.fills, 1);
    assert_eq!(summary.duplicate_fills, 1);
    assert_eq!(summary.ledger.quantity(common::IDS[0]), 100);
}

// ─── 3. Safety gate ─────────────────────────────────────────────────

#[tokio::test]
async fn oversized_order_is_refused_before_dispatch() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();

    let routed = router.submit(intent(50_000), &ctx()).await.unwrap();
    assert!(matches!(
        routed,
        Routed::Rejected(RejectReason::Safety { .. })
    ));
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.fills, 0);
    assert!(summary.ledger.quantities().is_empty());
}

// ─── 4. Ack timeout ─────────────────────────────────────────────────

#[tokio::test]
async fn unacknowledged_order_times_out() {
    let mut config = live_config();
    config.olm.ack_timeout_ms = 20;
    config.clock.heartbeat_ms = 5;
    let (session, router) =
        LiveSession::new(&config, Box::new(SilentVenue), &registry()).unwrap();
    let desk = router.desk();
    let task = tokio::spawn(session.run());

    let Routed::Working(id) = router.submit(intent(100), &ctx()).await.unwrap() else {
        panic!("order not working");
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(router);

    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.timeouts, 1);
    assert_eq!(
        desk.order(id).await.unwrap().state,
        OrderState::Rejected {
            reason: RejectReason::Timeout
        }
    );
}

// ─── 5. Reconciliation ──────────────────────────────────────────────

#[tokio::test]
async fn reconcile_against_venue_is_clean() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();

    router.submit(intent(300), &ctx()).await.unwrap();
    router
        .handle()
        .submit_now(EventPayload::Timer(TimerKind::Reconcile))
        .unwrap();
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.discrepancies, 0);
    assert_eq!(summary.ledger.quantity(common::IDS[0]), 300);
}

// ─── 6. Live allocation ─────────────────────────────────────────────

/// Today's bar for every fixture security, known now.
fn live_bars() -> Vec<Bar> {
    let now = Utc::now();
    common::IDS
        .iter()
        .zip([100.0, 50.0, 200.0])
        .map(|(id, close)| {
            Bar::daily(
                *id,
                Instant::observed(now),
                close,
                close * 1.005,
                close * 0.995,
                close,
                1_000_000.0,
            )
        })
        .collect()
}

#[tokio::test]
async fn rebalance_trigger_routes_orders_from_live_bars() {
    let mut config = live_config();
    config.olm.ack_timeout_ms = 50;
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (mut session, router) = LiveSession::new(&config, venue, &registry()).unwrap();
    session.load(common::replay()).unwrap();

    let handle = router.handle().clone();
    for bar in live_bars() {
        handle.submit_now(EventPayload::MarketData(bar)).unwrap();
    }
    handle.submit_now(EventPayload::RebalanceTrigger).unwrap();
    drop(handle);
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.rebalance_triggers, 1);
    assert_eq!(summary.rebalances, 1);
    assert_eq!(summary.degraded_cycles, 0);
    assert!(summary.orders_routed >= 2);
    assert_eq!(summary.fills, summary.orders_routed);
    assert!(summary.ledger.quantity(common::IDS[0]) > 0);
    assert!(summary.ledger.quantity(common::IDS[1]) < 0);
}

// ─── 7. Skipped trigger ─────────────────────────────────────────────

#[tokio::test]
async fn trigger_without_risk_model_is_skipped() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (mut session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();
    let data = pitlab_runner::ReplayData {
        risk_models: Vec::new(),
        ..common::replay()
    };
    session.load(data).unwrap();

    router
        .handle()
        .submit_now(EventPayload::RebalanceTrigger)
        .unwrap();
    drop(router);

    let summary = session.run().await.unwrap();
    assert_eq!(summary.rebalance_triggers, 1);
    assert_eq!(summary.skipped_rebalances, 1);
    assert_eq!(summary.orders_routed, 0);
    assert!(summary.ledger.quantities().is_empty());
}

// ─── 8. Causality ───────────────────────────────────────────────────

#[tokio::test]
async fn bar_known_in_the_future_halts_session() {
    let venue = Box::new(ImmediateBackend::new(&SimulatorConfig::default()));
    let (session, router) = LiveSession::new(&live_config(), venue, &registry()).unwrap();

    let mut bar = live_bars().remove(0);
    bar.stamp = Instant::new(Utc::now(), Utc::now() + chrono::Duration::hours(1));
    router.handle().submit_now(EventPayload::MarketData(bar)).unwrap();
    drop(router);

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, LiveError::Halted { .. }), "got {err:?}");
}
