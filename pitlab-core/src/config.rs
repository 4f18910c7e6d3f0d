//! Typed configuration sections for the engine's components.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! needs the keys it wants to change. The runner crate assembles these under
//! one root and layers environment overrides on top.

use serde::{Deserialize, Serialize};

// ── Allocation ───────────────────────────────────────────────────────

/// Transaction cost parameters for the allocation objective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostParams {
    /// Linear cost (half-spread plus commission) in basis points of traded notional.
    pub linear_bps: f64,
    /// Impact coefficient η in `k_i = η·σ_i·(capital / ADV$_i)^p`, where `p`
    /// is the simulator's participation exponent.
    pub impact_eta: f64,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            linear_bps: 5.0,
            impact_eta: 0.1,
        }
    }
}

/// Soft-constraint penalty coefficients and their targets.
///
/// A coefficient of zero disables the term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PenaltyConfig {
    /// Penalty on gross exposure above `leverage_limit`.
    pub leverage: f64,
    pub leverage_limit: f64,
    /// Penalty on one-way turnover above `turnover_limit`.
    pub turnover: f64,
    pub turnover_limit: f64,
    /// Penalty on net exposure away from `net_target`.
    pub net: f64,
    pub net_target: f64,
    /// Penalty on portfolio factor exposure away from zero.
    pub factor: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            leverage: 10.0,
            leverage_limit: 1.0,
            turnover: 1.0,
            turnover_limit: 1.0,
            net: 0.0,
            net_target: 0.0,
            factor: 0.0,
        }
    }
}

impl PenaltyConfig {
    /// All coefficients zero.
    pub fn none() -> Self {
        Self {
            leverage: 0.0,
            turnover: 0.0,
            net: 0.0,
            factor: 0.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    /// λ in `w·μ − ½λ·wᵀΣw`.
    pub risk_aversion: f64,
    /// Per-security weight bound: weights live in `[-max_position, max_position]`.
    pub max_position: f64,
    pub costs: CostParams,
    pub penalties: PenaltyConfig,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            risk_aversion: 1.0,
            max_position: 0.2,
            costs: CostParams::default(),
            penalties: PenaltyConfig::default(),
        }
    }
}

// ── Safety ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Orders larger than this fraction of ADV are refused.
    pub max_adv_participation: f64,
    /// Submissions allowed per rate window.
    pub max_messages_per_window: usize,
    pub rate_window_ms: i64,
    /// Intraday drawdown (negative fraction) that latches the kill switch.
    pub max_drawdown_limit: f64,
    /// Refuse orders for securities with no ADV estimate.
    pub reject_without_adv: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_adv_participation: 0.01,
            max_messages_per_window: 10,
            rate_window_ms: 1_000,
            max_drawdown_limit: -0.02,
            reject_without_adv: false,
        }
    }
}

// ── Execution simulator ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimAlgo {
    Twap,
    Vwap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub algo: SimAlgo,
    pub slices: usize,
    /// Total time over which slices are spread.
    pub horizon_minutes: i64,
    /// Impact coefficient on `participation^impact_exponent · volatility · price`.
    pub impact_coef: f64,
    /// Participation exponent of the impact model. The allocator charges
    /// `|Δw|^(1 + impact_exponent)` to match.
    pub impact_exponent: f64,
    /// Full quoted spread in basis points; half is paid per share.
    pub spread_bps: f64,
    /// Max random offset applied to each slice time, as a fraction of the slice interval.
    pub jitter: f64,
    pub ack_latency_ms: i64,
    pub cancel_latency_ms: i64,
    pub fee_per_share: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            algo: SimAlgo::Twap,
            slices: 5,
            horizon_minutes: 25,
            impact_coef: 0.1,
            impact_exponent: 0.6,
            spread_bps: 2.0,
            jitter: 0.25,
            ack_latency_ms: 50,
            cancel_latency_ms: 200,
            fee_per_share: 0.0,
        }
    }
}

// ── Order lifecycle ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OlmConfig {
    /// Submitted orders with no ack after this long are rejected by timeout.
    pub ack_timeout_ms: i64,
    /// Intents smaller than this many shares are skipped.
    pub min_order_qty: u64,
    pub lot_size: u64,
}

impl Default for OlmConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            min_order_qty: 1,
            lot_size: 1,
        }
    }
}

// ── Point-in-time reads ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapPolicy {
    /// Carry the last visible bar forward, flagged.
    ForwardFill,
    /// Leave the security out.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PitConfig {
    pub gap_policy: GapPolicy,
    /// Missed sessions a forward fill may cover before the gap is unrecoverable.
    pub max_staleness_sessions: u32,
    pub adv_lookback: usize,
    pub vol_lookback: usize,
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::ForwardFill,
            max_staleness_sessions: 3,
            adv_lookback: 20,
            vol_lookback: 20,
        }
    }
}

// ── Clock ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    /// Live-mode heartbeat period.
    pub heartbeat_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { heartbeat_ms: 1_000 }
    }
}
