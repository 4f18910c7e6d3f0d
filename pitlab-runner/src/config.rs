//! Serializable run configuration.
//!
//! A run is described by one TOML document:
//!
//! ```toml
//! [run]
//! seed = 42
//! capital = 1_000_000.0
//! start = "2024-01-02"
//! end = "2024-03-29"
//! universe = [1, 2, 3]
//!
//! [components]
//! solver = "projected_gradient"
//! backend = "simulated"
//!
//! [simulator]
//! algo = "VWAP"
//! ```
//!
//! Every engine section falls back to its defaults when omitted. A fixed set
//! of scalar keys may be overridden with `PITLAB_<SECTION>_<KEY>`
//! environment variables.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use pitlab_core::config::{
    AllocationConfig, ClockConfig, OlmConfig, PitConfig, SafetyConfig, SimAlgo, SimulatorConfig,
};
use pitlab_core::context::{RunContext, RunMode};
use pitlab_core::domain::{RunId, SecurityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PITLAB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("override {key}={value} is not valid")]
    Override { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Sections ─────────────────────────────────────────────────────────

fn default_capital() -> f64 {
    1_000_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_capital")]
    pub capital: f64,
    /// First session (inclusive).
    pub start: NaiveDate,
    /// Last session (inclusive).
    pub end: NaiveDate,
    /// Fixed universe. Empty means "ask the market data store each date".
    #[serde(default)]
    pub universe: Vec<SecurityId>,
}

/// Intraday times are UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub rebalance_time: NaiveTime,
    pub session_close: NaiveTime,
    /// Rebalance on every n-th session.
    pub rebalance_every: u32,
    /// Reconcile against the broker at every n-th session close.
    pub reconcile_every: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rebalance_time: NaiveTime::from_hms_opt(14, 45, 0).unwrap_or_default(),
            session_close: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
            rebalance_every: 1,
            reconcile_every: 1,
        }
    }
}

/// Registry names of the pluggable components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComponentsConfig {
    pub solver: String,
    pub backend: String,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            solver: "projected_gradient".into(),
            backend: "simulated".into(),
        }
    }
}

// ── Root ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    pub run: RunSection,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub olm: OlmConfig,
    #[serde(default)]
    pub pit: PitConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

impl SimConfig {
    /// Defaults for every section over the given sessions.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            run: RunSection {
                seed: 0,
                mode: RunMode::Backtest,
                capital: default_capital(),
                start,
                end,
                universe: Vec::new(),
            },
            schedule: ScheduleConfig::default(),
            components: ComponentsConfig::default(),
            allocation: AllocationConfig::default(),
            safety: SafetyConfig::default(),
            simulator: SimulatorConfig::default(),
            olm: OlmConfig::default(),
            pit: PitConfig::default(),
            clock: ClockConfig::default(),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.run.end < self.run.start {
            return fail("run.end precedes run.start");
        }
        if !(self.run.capital.is_finite() && self.run.capital > 0.0) {
            return fail("run.capital must be positive");
        }
        if self.schedule.rebalance_time >= self.schedule.session_close {
            return fail("schedule.rebalance_time must precede schedule.session_close");
        }
        if self.schedule.rebalance_every == 0 || self.schedule.reconcile_every == 0 {
            return fail("schedule cadences must be at least 1");
        }
        if self.simulator.slices == 0 {
            return fail("simulator.slices must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.simulator.impact_exponent) {
            return fail("simulator.impact_exponent must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.allocation.max_position) {
            return fail("allocation.max_position must lie in [0, 1]");
        }
        if self.safety.max_drawdown_limit > 0.0 {
            return fail("safety.max_drawdown_limit is a negative fraction");
        }
        Ok(())
    }

    /// Apply `PITLAB_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<usize, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Returns how many keys were set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<usize, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        let mut set = |section: &str, name: &str, apply: &mut dyn FnMut(&str) -> bool| {
            let key = format!("{ENV_PREFIX}_{section}_{name}");
            match lookup(&key) {
                Some(value) if apply(value.trim()) => {
                    applied += 1;
                    Ok(())
                }
                Some(value) => Err(ConfigError::Override { key, value }),
                None => Ok(()),
            }
        };

        set("RUN", "SEED", &mut |v| parse_into(v, &mut self.run.seed))?;
        set("RUN", "CAPITAL", &mut |v| parse_into(v, &mut self.run.capital))?;
        set("RUN", "MODE", &mut |v| match v.to_ascii_lowercase().as_str() {
            "backtest" => {
                self.run.mode = RunMode::Backtest;
                true
            }
            "live" => {
                self.run.mode = RunMode::Live;
                true
            }
            _ => false,
        })?;
        set("COMPONENTS", "SOLVER", &mut |v| {
            self.components.solver = v.to_string();
            !v.is_empty()
        })?;
        set("COMPONENTS", "BACKEND", &mut |v| {
            self.components.backend = v.to_string();
            !v.is_empty()
        })?;
        set("ALLOCATION", "RISK_AVERSION", &mut |v| {
            parse_into(v, &mut self.allocation.risk_aversion)
        })?;
        set("ALLOCATION", "MAX_POSITION", &mut |v| {
            parse_into(v, &mut self.allocation.max_position)
        })?;
        set("SAFETY", "MAX_ADV_PARTICIPATION", &mut |v| {
            parse_into(v, &mut self.safety.max_adv_participation)
        })?;
        set("SAFETY", "MAX_MESSAGES_PER_WINDOW", &mut |v| {
            parse_into(v, &mut self.safety.max_messages_per_window)
        })?;
        set("SAFETY", "MAX_DRAWDOWN_LIMIT", &mut |v| {
            parse_into(v, &mut self.safety.max_drawdown_limit)
        })?;
        set("SIMULATOR", "ALGO", &mut |v| match v.to_ascii_uppercase().as_str() {
            "TWAP" => {
                self.simulator.algo = SimAlgo::Twap;
                true
            }
            "VWAP" => {
                self.simulator.algo = SimAlgo::Vwap;
                true
            }
            _ => false,
        })?;
        set("SIMULATOR", "SLICES", &mut |v| parse_into(v, &mut self.simulator.slices))?;
        set("SIMULATOR", "IMPACT_COEF", &mut |v| {
            parse_into(v, &mut self.simulator.impact_coef)
        })?;
        set("SIMULATOR", "IMPACT_EXPONENT", &mut |v| {
            parse_into(v, &mut self.simulator.impact_exponent)
        })?;
        set("OLM", "ACK_TIMEOUT_MS", &mut |v| parse_into(v, &mut self.olm.ack_timeout_ms))?;
        Ok(applied)
    }

    /// Canonical text the run id is derived from.
    pub fn canonical(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        Ok(RunId::derive(&self.canonical()?, self.run.seed))
    }

    /// Midnight UTC of the first session.
    pub fn start_instant(&self) -> Timestamp {
        Utc.from_utc_datetime(&self.run.start.and_time(NaiveTime::default()))
    }

    pub fn context(&self) -> Result<RunContext, ConfigError> {
        Ok(RunContext::new(
            &self.canonical()?,
            self.run.seed,
            self.run.mode,
            self.start_instant(),
        ))
    }
}

fn parse_into<T: FromStr>(text: &str, slot: &mut T) -> bool {
    match text.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        [run]
        seed = 7
        start = "2024-01-02"
        end = "2024-01-31"
        universe = [1, 2]
    "#;

    #[test]
    fn minimal_document_fills_defaults() {
        let config = SimConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.run.capital, 1_000_000.0);
        assert_eq!(config.run.universe, vec![SecurityId(1), SecurityId(2)]);
        assert_eq!(config.components.solver, "projected_gradient");
        assert_eq!(config.simulator, SimulatorConfig::default());
    }

    #[test]
    fn sections_parse() {
        let text = format!(
            "{MINIMAL}\n[simulator]\nalgo = \"VWAP\"\nslices = 8\n\n[schedule]\nrebalance_time = \"15:00:00\"\n"
        );
        let config = SimConfig::from_toml(&text).unwrap();
        assert_eq!(config.simulator.algo, SimAlgo::Vwap);
        assert_eq!(config.simulator.slices, 8);
        assert_eq!(
            config.schedule.rebalance_time,
            NaiveTime::from_hms_opt(15, 0, 0).unwrap()
        );
    }

    #[test]
    fn reversed_dates_are_invalid() {
        let text = MINIMAL.replace("2024-01-31", "2023-12-31");
        assert!(matches!(
            SimConfig::from_toml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn impact_exponent_out_of_range_is_invalid() {
        let text = format!("{MINIMAL}\n[simulator]\nimpact_exponent = 1.5\n");
        assert!(matches!(
            SimConfig::from_toml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn overrides_apply_and_count() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PITLAB_RUN_SEED", "99"),
            ("PITLAB_SIMULATOR_ALGO", "vwap"),
            ("PITLAB_SAFETY_MAX_MESSAGES_PER_WINDOW", "25"),
        ]);
        let mut config = SimConfig::from_toml(MINIMAL).unwrap();
        let n = config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(config.run.seed, 99);
        assert_eq!(config.simulator.algo, SimAlgo::Vwap);
        assert_eq!(config.safety.max_messages_per_window, 25);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = SimConfig::from_toml(MINIMAL).unwrap();
        let err = config
            .apply_overrides(|k| (k == "PITLAB_RUN_CAPITAL").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Override { .. }));
    }

    #[test]
    fn run_id_tracks_content() {
        let a = SimConfig::from_toml(MINIMAL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.run_id().unwrap(), b.run_id().unwrap());
        b.allocation.risk_aversion = 3.0;
        assert_ne!(a.run_id().unwrap(), b.run_id().unwrap());
    }
}
