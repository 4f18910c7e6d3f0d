//! Per-run context, passed by reference into every component that needs to
//! know which run it belongs to.

use crate::domain::{RunId, Timestamp};
use crate::rng::RngHierarchy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Single-threaded replay driven by the event queue.
    #[default]
    Backtest,
    /// Real-time dispatch on the tokio runtime.
    Live,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub mode: RunMode,
    pub seed: u64,
    pub rng: RngHierarchy,
    pub start: Timestamp,
}

impl RunContext {
    /// Build a context whose run id hashes the canonical config text and seed.
    pub fn new(canonical_config: &str, seed: u64, mode: RunMode, start: Timestamp) -> Self {
        Self {
            run_id: RunId::derive(canonical_config, seed),
            mode,
            seed,
            rng: RngHierarchy::new(seed),
            start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn same_inputs_same_run_id() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let a = RunContext::new("cfg", 42, RunMode::Backtest, t);
        let b = RunContext::new("cfg", 42, RunMode::Backtest, t);
        let c = RunContext::new("cfg", 43, RunMode::Backtest, t);
        assert_eq!(a.run_id, b.run_id);
        assert_ne!(a.run_id, c.run_id);
    }
}
