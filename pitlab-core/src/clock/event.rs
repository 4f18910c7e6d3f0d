use crate::domain::{Bar, CorporateAction, ExecutionReport, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Tie-break priority for events sharing a timestamp. Lower delivers first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventClass {
    MarketData = 0,
    CorporateAction = 1,
    RebalanceTrigger = 2,
    ExecutionReport = 3,
    Timer = 4,
}

/// Housekeeping timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Reject submitted orders that were never acknowledged.
    AckTimeoutSweep,
    /// Diff the ledger against the broker snapshot.
    Reconcile,
    /// End of session: cancel working orders, mark to market.
    SessionClose,
    /// Periodic live-mode tick.
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A bar became visible.
    MarketData(Bar),
    /// A corporate action became visible.
    CorporateAction(CorporateAction),
    RebalanceTrigger,
    Execution(ExecutionReport),
    Timer(TimerKind),
}

impl EventPayload {
    pub fn class(&self) -> EventClass {
        match self {
            EventPayload::MarketData(_) => EventClass::MarketData,
            EventPayload::CorporateAction(_) => EventClass::CorporateAction,
            EventPayload::RebalanceTrigger => EventClass::RebalanceTrigger,
            EventPayload::Execution(_) => EventClass::ExecutionReport,
            EventPayload::Timer(_) => EventClass::Timer,
        }
    }
}

/// A scheduled event. Ordered by `(at, class, seq)` only.
#[derive(Debug, Clone)]
pub struct Event {
    pub at: Timestamp,
    pub class: EventClass,
    pub seq: u64,
    pub payload: EventPayload,
}

impl Event {
    fn key(&self) -> (Timestamp, EventClass, u64) {
        (self.at, self.class, self.seq)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
