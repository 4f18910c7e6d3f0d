use super::ids::{FillId, OrderId, SecurityId};
use super::instant::Timestamp;
use super::order::OrderSide;
use serde::{Deserialize, Serialize};

/// Confirmed execution. Append-only and immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub security_id: SecurityId,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: f64,
    pub venue: String,
    pub timestamp: Timestamp,
    /// Explicit fees charged on top of the fill price.
    pub fees: f64,
}

impl Fill {
    /// Signed share change this fill applies to the position.
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * self.quantity as i64
    }

    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }

    /// Cash change: buys pay notional plus fees, sells receive notional minus fees.
    pub fn cash_flow(&self) -> f64 {
        -(self.side.sign() as f64) * self.notional() - self.fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fill(side: OrderSide) -> Fill {
        Fill {
            order_id: OrderId(1),
            fill_id: FillId::new("1-0"),
            security_id: SecurityId(1),
            side,
            quantity: 10,
            price: 50.0,
            venue: "SIM".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            fees: 1.0,
        }
    }

    #[test]
    fn buy_cash_flow_includes_fees() {
        assert_eq!(fill(OrderSide::Buy).cash_flow(), -501.0);
        assert_eq!(fill(OrderSide::Buy).signed_quantity(), 10);
    }

    #[test]
    fn sell_cash_flow_nets_fees() {
        assert_eq!(fill(OrderSide::Sell).cash_flow(), 499.0);
        assert_eq!(fill(OrderSide::Sell).signed_quantity(), -10);
    }
}
