//! Simulated venues implementing [`ExecutionBackend`].

use super::impact::{ImpactModel, PowerLawImpact, SpreadOnly};
use super::schedule::build_schedule;
use super::ExecutionCost;
use crate::config::SimulatorConfig;
use crate::domain::{ExecutionReport, Fill, FillId, Order, OrderId, OrderSide, RunId, SecurityId, Timestamp};
use crate::olm::{ExecutionBackend, MarketContext, OlmError, ScheduledReport};
use crate::rng::RngHierarchy;
use chrono::Duration;
use std::collections::BTreeMap;
use tracing::debug;

/// Minutes in a regular US equity session; scales ADV to the horizon.
pub const SESSION_MINUTES: f64 = 390.0;

const VENUE: &str = "SIM";

#[derive(Debug, Clone)]
struct Working {
    security_id: SecurityId,
    side: OrderSide,
    cancel_ack_at: Option<Timestamp>,
}

/// Schedule-driven simulated broker.
///
/// Each order is acked after `ack_latency_ms`, then filled in child slices
/// over the configured horizon. Cancels are acked after
/// `cancel_latency_ms`; slices due at or before the cancel ack still fill,
/// later ones are withdrawn when they come due.
pub struct SimulatedBroker {
    config: SimulatorConfig,
    model: Box<dyn ImpactModel>,
    rng: RngHierarchy,
    run_id: RunId,
    working: BTreeMap<OrderId, Working>,
    quoted: BTreeMap<FillId, ExecutionCost>,
    costs: Vec<ExecutionCost>,
    positions: BTreeMap<SecurityId, i64>,
}

impl SimulatedBroker {
    pub fn new(config: SimulatorConfig, rng: RngHierarchy, run_id: RunId) -> Self {
        let model = Box::new(PowerLawImpact::with_exponent(
            config.impact_coef,
            config.impact_exponent,
            config.spread_bps,
        ));
        Self::with_model(config, model, rng, run_id)
    }

    pub fn with_model(
        config: SimulatorConfig,
        model: Box<dyn ImpactModel>,
        rng: RngHierarchy,
        run_id: RunId,
    ) -> Self {
        Self {
            config,
            model,
            rng,
            run_id,
            working: BTreeMap::new(),
            quoted: BTreeMap::new(),
            costs: Vec::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Force the venue's position, e.g. to mimic a broker-side adjustment.
    pub fn set_position(&mut self, security_id: SecurityId, quantity: i64) {
        if quantity == 0 {
            self.positions.remove(&security_id);
        } else {
            self.positions.insert(security_id, quantity);
        }
    }

    fn horizon(&self) -> Duration {
        Duration::minutes(self.config.horizon_minutes.max(0))
    }
}

impl ExecutionBackend for SimulatedBroker {
    fn name(&self) -> &str {
        "simulated"
    }

    fn dispatch(
        &mut self,
        order: &Order,
        ctx: &MarketContext,
        now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError> {
        if !(ctx.price.is_finite() && ctx.price > 0.0) {
            return Err(OlmError::Backend(format!(
                "no arrival price for {}",
                order.security_id
            )));
        }
        let ack_at = now + Duration::milliseconds(self.config.ack_latency_ms.max(0));
        let mut rng = self.rng.rng_for(&self.run_id, &order.id.to_string(), 0);
        let slices = build_schedule(
            self.config.algo,
            order.quantity,
            self.config.slices,
            self.horizon(),
            ctx.volume_curve.as_deref(),
            self.config.jitter,
            &mut rng,
        );
        let horizon_volume = ctx
            .adv
            .filter(|adv| adv.is_finite() && *adv > 0.0)
            .map(|adv| adv * self.config.horizon_minutes as f64 / SESSION_MINUTES);

        let mut reports = vec![ScheduledReport {
            at: ack_at,
            report: ExecutionReport::Ack {
                order_id: order.id,
                at: ack_at,
            },
        }];
        for (i, slice) in slices.iter().enumerate() {
            let participation = match horizon_volume {
                Some(volume) if slice.volume_share > 0.0 => {
                    Some(slice.quantity as f64 / (volume * slice.volume_share))
                }
                _ => None,
            };
            // Unknown ADV is charged as full participation.
            let cost = self
                .model
                .cost(participation.unwrap_or(1.0), ctx.volatility, ctx.price);
            let price = ctx.price + order.side.sign() as f64 * cost.total();
            let at = ack_at + slice.offset;
            let fill_id = FillId::new(format!("{}-{}", order.id, i));
            self.quoted.insert(
                fill_id.clone(),
                ExecutionCost {
                    order_id: order.id,
                    fill_id: fill_id.clone(),
                    security_id: order.security_id,
                    quantity: slice.quantity,
                    arrival_price: ctx.price,
                    participation,
                    impact: cost.impact * slice.quantity as f64,
                    spread: cost.spread * slice.quantity as f64,
                },
            );
            reports.push(ScheduledReport {
                at,
                report: ExecutionReport::Fill(Fill {
                    order_id: order.id,
                    fill_id,
                    security_id: order.security_id,
                    side: order.side,
                    quantity: slice.quantity,
                    price,
                    venue: VENUE.into(),
                    timestamp: at,
                    fees: self.config.fee_per_share * slice.quantity as f64,
                }),
            });
        }
        debug!(
            order_id = %order.id,
            slices = slices.len(),
            algo = ?self.config.algo,
            "order scheduled"
        );
        self.working.insert(
            order.id,
            Working {
                security_id: order.security_id,
                side: order.side,
                cancel_ack_at: None,
            },
        );
        Ok(reports)
    }

    fn request_cancel(&mut self, order_id: OrderId, now: Timestamp) -> Vec<ScheduledReport> {
        let Some(working) = self.working.get_mut(&order_id) else {
            return Vec::new();
        };
        if working.cancel_ack_at.is_some() {
            return Vec::new();
        }
        let at = now + Duration::milliseconds(self.config.cancel_latency_ms.max(0));
        working.cancel_ack_at = Some(at);
        debug!(order_id = %order_id, security = %working.security_id, side = ?working.side, "cancel accepted");
        vec![ScheduledReport {
            at,
            report: ExecutionReport::CancelAck { order_id, at },
        }]
    }

    fn release(&mut self, report: ExecutionReport) -> Option<ExecutionReport> {
        let ExecutionReport::Fill(fill) = &report else {
            return Some(report);
        };
        let cancelled_before = self
            .working
            .get(&fill.order_id)
            .and_then(|w| w.cancel_ack_at)
            .is_some_and(|ack| fill.timestamp > ack);
        if cancelled_before {
            self.quoted.remove(&fill.fill_id);
            debug!(order_id = %fill.order_id, fill_id = %fill.fill_id, "slice withdrawn after cancel");
            return None;
        }
        *self.positions.entry(fill.security_id).or_insert(0) += fill.signed_quantity();
        self.positions.retain(|_, q| *q != 0);
        if let Some(cost) = self.quoted.remove(&fill.fill_id) {
            self.costs.push(cost);
        }
        Some(report)
    }

    fn broker_positions(&self) -> Option<BTreeMap<SecurityId, i64>> {
        Some(self.positions.clone())
    }

    fn drain_costs(&mut self) -> Vec<ExecutionCost> {
        std::mem::take(&mut self.costs)
    }
}

/// Fills every order in full at the arrival price plus half the spread, at
/// the dispatch instant.
#[derive(Debug, Default)]
pub struct ImmediateBackend {
    spread_bps: f64,
    fee_per_share: f64,
    positions: BTreeMap<SecurityId, i64>,
    costs: Vec<ExecutionCost>,
}

impl ImmediateBackend {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            spread_bps: config.spread_bps,
            fee_per_share: config.fee_per_share,
            ..Self::default()
        }
    }
}

impl ExecutionBackend for ImmediateBackend {
    fn name(&self) -> &str {
        "immediate"
    }

    fn dispatch(
        &mut self,
        order: &Order,
        ctx: &MarketContext,
        now: Timestamp,
    ) -> Result<Vec<ScheduledReport>, OlmError> {
        if !(ctx.price.is_finite() && ctx.price > 0.0) {
            return Err(OlmError::Backend(format!(
                "no arrival price for {}",
                order.security_id
            )));
        }
        let cost = SpreadOnly {
            spread_bps: self.spread_bps,
        }
        .cost(0.0, ctx.volatility, ctx.price);
        let fill_id = FillId::new(format!("{}-0", order.id));
        *self.positions.entry(order.security_id).or_insert(0) +=
            order.side.sign() * order.quantity as i64;
        self.positions.retain(|_, q| *q != 0);
        self.costs.push(ExecutionCost {
            order_id: order.id,
            fill_id: fill_id.clone(),
            security_id: order.security_id,
            quantity: order.quantity,
            arrival_price: ctx.price,
            participation: None,
            impact: 0.0,
            spread: cost.spread * order.quantity as f64,
        });
        Ok(vec![
            ScheduledReport {
                at: now,
                report: ExecutionReport::Ack {
                    order_id: order.id,
                    at: now,
                },
            },
            ScheduledReport {
                at: now,
                report: ExecutionReport::Fill(Fill {
                    order_id: order.id,
                    fill_id,
                    security_id: order.security_id,
                    side: order.side,
                    quantity: order.quantity,
                    price: ctx.price + order.side.sign() as f64 * cost.total(),
                    venue: VENUE.into(),
                    timestamp: now,
                    fees: self.fee_per_share * order.quantity as f64,
                }),
            },
        ])
    }

    fn request_cancel(&mut self, _order_id: OrderId, _now: Timestamp) -> Vec<ScheduledReport> {
        // Everything is filled on dispatch; nothing left to cancel.
        Vec::new()
    }

    fn broker_positions(&self) -> Option<BTreeMap<SecurityId, i64>> {
        Some(self.positions.clone())
    }

    fn drain_costs(&mut self) -> Vec<ExecutionCost> {
        std::mem::take(&mut self.costs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimAlgo;
    use crate::domain::WeightDelta;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
    }

    fn order(id: u64, qty: u64, side: OrderSide) -> Order {
        Order::new(
            OrderId(id),
            SecurityId(1),
            side,
            qty,
            WeightDelta::new(t0(), 0.0, 0.1),
            t0(),
        )
    }

    fn ctx() -> MarketContext {
        MarketContext {
            price: 100.0,
            volatility: 0.02,
            adv: Some(1_000_000.0),
            volume_curve: None,
        }
    }

    fn broker(seed: u64) -> SimulatedBroker {
        SimulatedBroker::new(
            SimulatorConfig::default(),
            RngHierarchy::new(seed),
            RunId::from_bytes(b"sim"),
        )
    }

    fn fills(reports: &[ScheduledReport]) -> Vec<&Fill> {
        reports
            .iter()
            .filter_map(|r| match &r.report {
                ExecutionReport::Fill(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ack_precedes_fills_and_slices_sum_to_order() {
        let mut b = broker(1);
        let reports = b.dispatch(&order(1, 1_003, OrderSide::Buy), &ctx(), t0()).unwrap();
        assert!(matches!(reports[0].report, ExecutionReport::Ack { .. }));
        let fs = fills(&reports);
        assert_eq!(fs.len(), 5);
        assert_eq!(fs.iter().map(|f| f.quantity).sum::<u64>(), 1_003);
        assert!(fs.iter().all(|f| f.timestamp >= reports[0].at));
        assert_eq!(fs[0].fill_id, FillId::new("ord:1-0"));
    }

    #[test]
    fn buys_pay_up_and_sells_receive_less() {
        let mut b = broker(1);
        let buy = b.dispatch(&order(1, 10_000, OrderSide::Buy), &ctx(), t0()).unwrap();
        let sell = b.dispatch(&order(2, 10_000, OrderSide::Sell), &ctx(), t0()).unwrap();
        assert!(fills(&buy).iter().all(|f| f.price > 100.0));
        assert!(fills(&sell).iter().all(|f| f.price < 100.0));
    }

    #[test]
    fn same_seed_replays_identically() {
        let a = broker(9).dispatch(&order(1, 777, OrderSide::Buy), &ctx(), t0()).unwrap();
        let b = broker(9).dispatch(&order(1, 777, OrderSide::Buy), &ctx(), t0()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vwap_follows_the_volume_curve() {
        let config = SimulatorConfig {
            algo: SimAlgo::Vwap,
            slices: 2,
            ..SimulatorConfig::default()
        };
        let mut b = SimulatedBroker::new(config, RngHierarchy::new(1), RunId::from_bytes(b"sim"));
        let ctx = MarketContext {
            volume_curve: Some(vec![3.0, 1.0]),
            ..ctx()
        };
        let reports = b.dispatch(&order(1, 400, OrderSide::Buy), &ctx, t0()).unwrap();
        let qty: Vec<u64> = fills(&reports).iter().map(|f| f.quantity).collect();
        assert_eq!(qty, vec![300, 100]);
    }

    #[test]
    fn missing_price_is_a_backend_error() {
        let mut b = broker(1);
        let ctx = MarketContext::default();
        assert!(matches!(
            b.dispatch(&order(1, 10, OrderSide::Buy), &ctx, t0()),
            Err(OlmError::Backend(_))
        ));
    }

    #[test]
    fn cancel_withdraws_only_later_slices() {
        let config = SimulatorConfig {
            jitter: 0.0,
            ack_latency_ms: 0,
            cancel_latency_ms: 0,
            ..SimulatorConfig::default()
        };
        let mut b = SimulatedBroker::new(config, RngHierarchy::new(1), RunId::from_bytes(b"sim"));
        let reports = b.dispatch(&order(1, 500, OrderSide::Buy), &ctx(), t0()).unwrap();
        // Slices at 0, 5, 10, 15, 20 minutes; cancel at minute 7.
        let cancel = b.request_cancel(OrderId(1), t0() + Duration::minutes(7));
        assert_eq!(cancel.len(), 1);
        assert!(b.request_cancel(OrderId(1), t0() + Duration::minutes(8)).is_empty());

        let delivered: Vec<_> = fills(&reports)
            .into_iter()
            .filter_map(|f| b.release(ExecutionReport::Fill(f.clone())))
            .collect();
        assert_eq!(delivered.len(), 2);
        assert_eq!(b.broker_positions().unwrap()[&SecurityId(1)], 200);
        assert_eq!(b.drain_costs().len(), 2);
    }

    #[test]
    fn immediate_backend_fills_in_full() {
        let mut b = ImmediateBackend::new(&SimulatorConfig::default());
        let reports = b.dispatch(&order(4, 250, OrderSide::Sell), &ctx(), t0()).unwrap();
        let fs = fills(&reports);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs[0].quantity, 250);
        assert_eq!(fs[0].timestamp, t0());
        assert_eq!(b.broker_positions().unwrap()[&SecurityId(1)], -250);
    }
}
