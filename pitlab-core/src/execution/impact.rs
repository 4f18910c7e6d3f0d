//! Execution cost models: what a slice pays on top of the arrival price.
//!
//! Costs are per share in price units and always adverse: buys pay more,
//! sells receive less.

/// Per-share cost of one slice, split into its components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SliceCost {
    pub impact: f64,
    pub spread: f64,
}

impl SliceCost {
    pub fn total(&self) -> f64 {
        self.impact + self.spread
    }
}

/// Market impact model for a child slice.
pub trait ImpactModel: Send + Sync {
    /// Cost per share for trading at `participation` of the bucket's volume.
    fn cost(&self, participation: f64, volatility: f64, price: f64) -> SliceCost;

    fn name(&self) -> &str;
}

/// Power-law impact `coef · participation^exponent · volatility · price` plus
/// half the quoted spread. The exponent defaults to 0.6.
#[derive(Debug, Clone, Copy)]
pub struct PowerLawImpact {
    pub coef: f64,
    pub exponent: f64,
    pub spread_bps: f64,
}

impl PowerLawImpact {
    pub const EXPONENT: f64 = 0.6;

    pub fn new(coef: f64, spread_bps: f64) -> Self {
        Self::with_exponent(coef, Self::EXPONENT, spread_bps)
    }

    pub fn with_exponent(coef: f64, exponent: f64, spread_bps: f64) -> Self {
        Self {
            coef,
            exponent,
            spread_bps,
        }
    }
}

impl ImpactModel for PowerLawImpact {
    fn cost(&self, participation: f64, volatility: f64, price: f64) -> SliceCost {
        let participation = if participation.is_finite() {
            participation.max(0.0)
        } else {
            1.0
        };
        let volatility = if volatility.is_finite() {
            volatility.max(0.0)
        } else {
            0.0
        };
        SliceCost {
            impact: self.coef * participation.powf(self.exponent) * volatility * price,
            spread: price * self.spread_bps / 2.0 / 10_000.0,
        }
    }

    fn name(&self) -> &str {
        "PowerLawImpact"
    }
}

/// Spread only; no impact. Used by the immediate backend.
#[derive(Debug, Clone, Copy)]
pub struct SpreadOnly {
    pub spread_bps: f64,
}

impl ImpactModel for SpreadOnly {
    fn cost(&self, _participation: f64, _volatility: f64, price: f64) -> SliceCost {
        SliceCost {
            impact: 0.0,
            spread: price * self.spread_bps / 2.0 / 10_000.0,
        }
    }

    fn name(&self) -> &str {
        "SpreadOnly"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_scales_with_participation_to_the_point_six() {
        let model = PowerLawImpact::new(0.1, 0.0);
        let low = model.cost(0.01, 0.02, 100.0).impact;
        let high = model.cost(0.10, 0.02, 100.0).impact;
        // 10x participation -> 10^0.6 x impact
        assert!((high / low - 10f64.powf(0.6)).abs() < 1e-9);
    }

    #[test]
    fn spread_is_half_the_quoted_bps() {
        let model = PowerLawImpact::new(0.1, 2.0);
        let cost = model.cost(0.0, 0.02, 100.0);
        assert_eq!(cost.impact, 0.0);
        assert!((cost.spread - 0.01).abs() < 1e-12);
    }

    #[test]
    fn unknown_participation_is_charged_as_full() {
        let model = PowerLawImpact::new(0.1, 0.0);
        let cost = model.cost(f64::NAN, 0.02, 50.0);
        assert!((cost.impact - 0.1 * 0.02 * 50.0).abs() < 1e-12);
    }

    #[test]
    fn spread_only_has_no_impact() {
        let model = SpreadOnly { spread_bps: 10.0 };
        let cost = model.cost(1.0, 0.5, 20.0);
        assert_eq!(cost.impact, 0.0);
        assert!((cost.total() - 0.01).abs() < 1e-12);
    }
}
