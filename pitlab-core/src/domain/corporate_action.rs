use super::ids::SecurityId;
use super::instant::{Instant, Stamped};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of corporate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    /// `value` is the split ratio (2.0 for a 2-for-1 split).
    Split,
    /// `value` is the cash amount per share.
    CashDividend,
}

/// A corporate action. Consumed on read to adjust bar series; never mutates raw bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub security_id: SecurityId,
    pub effective_date: NaiveDate,
    pub action: ActionType,
    pub value: f64,
    pub stamp: Instant,
}

impl Stamped for CorporateAction {
    fn stamp(&self) -> Instant {
        self.stamp
    }
}

/// Whether a security belongs to the tradable set on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseMembership {
    pub security_id: SecurityId,
    pub as_of_date: NaiveDate,
    pub member: bool,
    pub stamp: Instant,
}

impl Stamped for UniverseMembership {
    fn stamp(&self) -> Instant {
        self.stamp
    }
}
