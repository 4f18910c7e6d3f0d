//! Position ledger: cash and positions, changed only by applied fills and
//! broker-authoritative reconciliation.

use crate::domain::{Fill, Position, SecurityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PositionLedger {
    cash: f64,
    positions: BTreeMap<SecurityId, Position>,
    realized_pnl: f64,
    fees: f64,
    fills_applied: usize,
}

/// Read-only copy of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash: f64,
    pub positions: BTreeMap<SecurityId, Position>,
    pub realized_pnl: f64,
    pub fees: f64,
    pub fills_applied: usize,
}

impl LedgerSnapshot {
    pub fn quantity(&self, id: SecurityId) -> i64 {
        self.positions.get(&id).map_or(0, |p| p.quantity)
    }

    /// Non-flat quantities.
    pub fn quantities(&self) -> BTreeMap<SecurityId, i64> {
        self.positions
            .iter()
            .filter(|(_, p)| !p.is_flat())
            .map(|(&id, p)| (id, p.quantity))
            .collect()
    }

    /// Marked value of positions; unpriced positions are carried at cost.
    pub fn market_value(&self, prices: &BTreeMap<SecurityId, f64>) -> f64 {
        self.positions
            .iter()
            .map(|(id, p)| p.market_value(prices.get(id).copied().unwrap_or(p.avg_cost)))
            .sum()
    }

    pub fn equity(&self, prices: &BTreeMap<SecurityId, f64>) -> f64 {
        self.cash + self.market_value(prices)
    }

    /// Current weights implied by marked positions.
    pub fn weights(&self, prices: &BTreeMap<SecurityId, f64>) -> BTreeMap<SecurityId, f64> {
        let equity = self.equity(prices);
        if equity <= 0.0 {
            return BTreeMap::new();
        }
        self.positions
            .iter()
            .filter(|(_, p)| !p.is_flat())
            .map(|(&id, p)| {
                let px = prices.get(&id).copied().unwrap_or(p.avg_cost);
                (id, p.market_value(px) / equity)
            })
            .collect()
    }
}

impl PositionLedger {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            fees: 0.0,
            fills_applied: 0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn quantity(&self, id: SecurityId) -> i64 {
        self.positions.get(&id).map_or(0, |p| p.quantity)
    }

    /// Apply a confirmed fill; returns the PnL it realized.
    pub(crate) fn apply_fill(&mut self, fill: &Fill) -> f64 {
        self.cash += fill.cash_flow();
        self.fees += fill.fees;
        self.fills_applied += 1;
        let pos = self
            .positions
            .entry(fill.security_id)
            .or_insert_with(|| Position::flat(fill.security_id));
        let realized = pos.apply(fill.signed_quantity(), fill.price);
        self.realized_pnl += realized;
        realized
    }

    /// Replace a quantity with the broker's. Cost basis is kept when the
    /// side is unchanged; otherwise it resets to `mark`.
    pub(crate) fn overwrite(&mut self, id: SecurityId, quantity: i64, mark: Option<f64>) {
        let pos = self
            .positions
            .entry(id)
            .or_insert_with(|| Position::flat(id));
        let same_side = pos.quantity.signum() == quantity.signum() && quantity != 0;
        if !same_side {
            pos.avg_cost = if quantity == 0 { 0.0 } else { mark.unwrap_or(0.0) };
        }
        pos.quantity = quantity;
        if pos.is_flat() && pos.realized_pnl == 0.0 {
            self.positions.remove(&id);
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash: self.cash,
            positions: self.positions.clone(),
            realized_pnl: self.realized_pnl,
            fees: self.fees,
            fills_applied: self.fills_applied,
        }
    }
}
