//! Pre-dispatch safety gate: kill switch, fat-finger ADV limit, message rate.

use crate::config::SafetyConfig;
use crate::domain::{SafetyCheck, SecurityId, Timestamp};
use chrono::{Duration, NaiveDate};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SafetyRejection {
    #[error("kill switch active")]
    KillSwitch,
    #[error("{quantity} shares of {security} exceed {limit:.0} ({fraction} of ADV)")]
    AdvParticipation {
        security: SecurityId,
        quantity: u64,
        limit: f64,
        fraction: f64,
    },
    #[error("no ADV estimate for {0}")]
    NoAdv(SecurityId),
    #[error("message rate limit of {max} per {window_ms}ms reached")]
    MessageRate { max: usize, window_ms: i64 },
}

impl SafetyRejection {
    pub fn check(&self) -> SafetyCheck {
        match self {
            SafetyRejection::KillSwitch => SafetyCheck::KillSwitch,
            SafetyRejection::AdvParticipation { .. } | SafetyRejection::NoAdv(_) => {
                SafetyCheck::AdvParticipation
            }
            SafetyRejection::MessageRate { .. } => SafetyCheck::MessageRate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyGate {
    config: SafetyConfig,
    sent: VecDeque<Timestamp>,
    killed: bool,
    session: Option<NaiveDate>,
    peak_equity: f64,
    rejections: usize,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            sent: VecDeque::new(),
            killed: false,
            session: None,
            peak_equity: 0.0,
            rejections: 0,
        }
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn rejections(&self) -> usize {
        self.rejections
    }

    /// Check one order. Passing orders consume a slot in the rate window,
    /// measured on clock time `now`.
    pub fn check(
        &mut self,
        security: SecurityId,
        quantity: u64,
        adv: Option<f64>,
        now: Timestamp,
    ) -> Result<(), SafetyRejection> {
        let verdict = self.evaluate(security, quantity, adv, now);
        match verdict {
            Ok(()) => self.sent.push_back(now),
            Err(_) => self.rejections += 1,
        }
        verdict
    }

    fn evaluate(
        &mut self,
        security: SecurityId,
        quantity: u64,
        adv: Option<f64>,
        now: Timestamp,
    ) -> Result<(), SafetyRejection> {
        if self.killed {
            return Err(SafetyRejection::KillSwitch);
        }

        match adv {
            Some(adv) => {
                let limit = adv * self.config.max_adv_participation;
                if quantity as f64 > limit {
                    return Err(SafetyRejection::AdvParticipation {
                        security,
                        quantity,
                        limit,
                        fraction: self.config.max_adv_participation,
                    });
                }
            }
            None if self.config.reject_without_adv => return Err(SafetyRejection::NoAdv(security)),
            None => {}
        }

        let window = Duration::milliseconds(self.config.rate_window_ms);
        while self.sent.front().is_some_and(|&t| t + window <= now) {
            self.sent.pop_front();
        }
        if self.sent.len() >= self.config.max_messages_per_window {
            return Err(SafetyRejection::MessageRate {
                max: self.config.max_messages_per_window,
                window_ms: self.config.rate_window_ms,
            });
        }
        Ok(())
    }

    /// Mark equity. The peak resets each session; a drawdown past the limit
    /// latches the kill switch until [`reset_kill_switch`](Self::reset_kill_switch).
    pub fn update_equity(&mut self, equity: f64, now: Timestamp) -> bool {
        let today = now.date_naive();
        if self.session != Some(today) {
            self.session = Some(today);
            self.peak_equity = equity;
        }
        self.peak_equity = self.peak_equity.max(equity);
        if self.peak_equity > 0.0 && !self.killed {
            let drawdown = equity / self.peak_equity - 1.0;
            if drawdown <= self.config.max_drawdown_limit {
                error!(
                    drawdown,
                    limit = self.config.max_drawdown_limit,
                    "intraday drawdown limit breached, kill switch latched"
                );
                self.killed = true;
            }
        }
        self.killed
    }

    pub fn reset_kill_switch(&mut self) {
        self.killed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(ms: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn fat_finger_is_relative_to_adv() {
        let mut gate = SafetyGate::new(SafetyConfig::default());
        assert!(gate.check(SecurityId(1), 100, Some(10_000.0), t(0)).is_ok());
        let err = gate
            .check(SecurityId(1), 101, Some(10_000.0), t(1))
            .unwrap_err();
        assert_eq!(err.check(), SafetyCheck::AdvParticipation);
        assert_eq!(gate.rejections(), 1);
    }

    #[test]
    fn rate_window_slides_on_clock_time() {
        let mut gate = SafetyGate::new(SafetyConfig {
            max_messages_per_window: 2,
            ..SafetyConfig::default()
        });
        assert!(gate.check(SecurityId(1), 1, None, t(0)).is_ok());
        assert!(gate.check(SecurityId(1), 1, None, t(10)).is_ok());
        assert!(matches!(
            gate.check(SecurityId(1), 1, None, t(20)),
            Err(SafetyRejection::MessageRate { .. })
        ));
        assert!(gate.check(SecurityId(1), 1, None, t(1_000)).is_ok());
    }

    #[test]
    fn kill_switch_latches() {
        let mut gate = SafetyGate::new(SafetyConfig::default());
        assert!(!gate.update_equity(100_000.0, t(0)));
        assert!(!gate.update_equity(101_000.0, t(1)));
        assert!(gate.update_equity(98_900.0, t(2)));
        assert!(gate.update_equity(101_000.0, t(3)));
        assert_eq!(
            gate.check(SecurityId(1), 1, None, t(4)),
            Err(SafetyRejection::KillSwitch)
        );
        gate.reset_kill_switch();
        assert!(gate.check(SecurityId(1), 1, None, t(5)).is_ok());
    }

    #[test]
    fn missing_adv_policy() {
        let mut gate = SafetyGate::new(SafetyConfig {
            reject_without_adv: true,
            ..SafetyConfig::default()
        });
        assert_eq!(
            gate.check(SecurityId(2), 1, None, t(0)),
            Err(SafetyRejection::NoAdv(SecurityId(2)))
        );
    }
}
