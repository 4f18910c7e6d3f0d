use super::ids::SecurityId;
use serde::{Deserialize, Serialize};

/// Ledger entry: signed share count with average cost basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub security_id: SecurityId,
    pub quantity: i64,
    pub avg_cost: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(security_id: SecurityId) -> Self {
        Self {
            security_id,
            quantity: 0,
            avg_cost: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.avg_cost)
    }

    /// Apply a signed share change at `price`, returning the PnL it realizes.
    ///
    /// Adding to a position averages the cost basis; reducing realizes PnL on
    /// the closed shares; crossing zero closes the old side and opens the new
    /// one at `price`.
    pub fn apply(&mut self, delta: i64, price: f64) -> f64 {
        if delta == 0 {
            return 0.0;
        }
        let same_direction = self.quantity == 0 || (self.quantity > 0) == (delta > 0);
        if same_direction {
            let total = self.quantity + delta;
            self.avg_cost = (self.avg_cost * self.quantity.abs() as f64
                + price * delta.abs() as f64)
                / total.abs() as f64;
            self.quantity = total;
            return 0.0;
        }

        let closed = delta.abs().min(self.quantity.abs());
        let direction = self.quantity.signum() as f64;
        let realized = (price - self.avg_cost) * closed as f64 * direction;
        self.realized_pnl += realized;
        self.quantity += delta;

        if self.quantity == 0 {
            self.avg_cost = 0.0;
        } else if (self.quantity > 0) == (delta > 0) {
            // flipped through zero
            self.avg_cost = price;
        }
        realized
    }
}
