//! Bitemporal stamps.
//!
//! Every timestamped fact carries two times: when the thing it describes
//! happened (`event_time`) and when the system could first have known about it
//! (`knowledge_time`). Point-in-time reads filter on the latter.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Wall/simulated time used throughout the engine.
pub type Timestamp = DateTime<Utc>;

/// (event_time, knowledge_time) pair carried by every timestamped fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instant {
    pub event_time: Timestamp,
    pub knowledge_time: Timestamp,
}

impl Instant {
    pub fn new(event_time: Timestamp, knowledge_time: Timestamp) -> Self {
        Self {
            event_time,
            knowledge_time,
        }
    }

    /// A fact known at the moment it happened.
    pub fn observed(at: Timestamp) -> Self {
        Self::new(at, at)
    }

    /// Whether the fact was knowable at `as_of`.
    pub fn is_known_at(&self, as_of: Timestamp) -> bool {
        self.knowledge_time <= as_of
    }
}

/// Anything that carries a bitemporal stamp.
pub trait Stamped {
    fn stamp(&self) -> Instant;
}

/// Inclusive event-time range for bar queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Inclusive calendar range for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        d >= self.start && d <= self.end
    }
}
