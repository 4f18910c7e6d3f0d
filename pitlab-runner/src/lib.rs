//! PitLab Runner: backtest and live orchestration on top of `pitlab-core`.
//!
//! This crate provides:
//! - TOML run configuration with `PITLAB_*` environment overrides
//! - The allocation cycle shared by both drivers
//! - The backtest driver wiring every engine component around one clock
//! - The live session over a real-time clock and concurrent order desk
//! - Performance statistics over the marked equity curve
//! - Run reports with JSON, CSV and Markdown export

pub mod backtest;
pub mod config;
pub mod cycle;
pub mod export;
pub mod live;
pub mod logging;
pub mod metrics;
pub mod report;

pub use backtest::{Backtest, RunError};
pub use config::{ConfigError, SimConfig};
pub use cycle::{AllocationCycle, ReplayData};
pub use export::{
    export_costs_csv, export_equity_csv, export_fills_csv, export_report_json, load_artifacts,
    save_artifacts,
};
pub use live::{LiveError, LiveSession, LiveSummary, OrderRouter, Routed};
pub use metrics::PerformanceStats;
pub use report::{RunReport, SCHEMA_VERSION};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn run_report_is_send_sync() {
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
    }

    #[test]
    fn config_is_send_sync() {
        assert_send::<SimConfig>();
        assert_sync::<SimConfig>();
    }

    #[test]
    fn order_router_is_send_sync() {
        assert_send::<OrderRouter>();
        assert_sync::<OrderRouter>();
    }

    #[test]
    fn live_session_is_send() {
        assert_send::<LiveSession>();
    }

    #[test]
    fn backtest_is_send() {
        assert_send::<Backtest>();
    }
}
