//! Result of a completed run.

use crate::metrics::PerformanceStats;
use pitlab_core::allocation::DegradedAllocation;
use pitlab_core::domain::{Fill, RunId, TargetWeights};
use pitlab_core::execution::ExecutionCost;
use pitlab_core::metrics::{Attribution, EquityPoint, MetricsSummary};
use pitlab_core::olm::{LedgerSnapshot, ReconciliationDiscrepancy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub seed: u64,
    pub solver: String,
    pub backend: String,
    pub summary: MetricsSummary,
    pub performance: PerformanceStats,
    pub equity_curve: Vec<EquityPoint>,
    pub attributions: Vec<Attribution>,
    pub fills: Vec<Fill>,
    pub costs: Vec<ExecutionCost>,
    pub degraded: Vec<DegradedAllocation>,
    pub discrepancies: Vec<ReconciliationDiscrepancy>,
    /// Orders per final state, keyed by state label.
    pub order_states: BTreeMap<String, usize>,
    pub final_ledger: LedgerSnapshot,
    /// Published target weights, one per completed rebalance.
    #[serde(default)]
    pub targets: Vec<TargetWeights>,
    pub rebalances: usize,
    /// Rebalances skipped for want of a risk model or universe.
    pub skipped_rebalances: usize,
}

impl RunReport {
    /// Orders that ended in the state with this label, e.g. `"FILLED"`.
    pub fn orders_in(&self, label: &str) -> usize {
        self.order_states.get(label).copied().unwrap_or(0)
    }
}
