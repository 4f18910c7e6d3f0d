//! Clock and event queue.
//!
//! The queue owns the monotonic "current instant". Events are delivered by
//! `(at, class, seq)`: time first, then a fixed class priority, then
//! insertion order, so replays are deterministic. Scheduling an event before
//! the current instant is a causality violation.

pub mod event;
pub mod live;
pub mod queue;

pub use event::{Event, EventClass, EventPayload, TimerKind};
pub use live::{LiveClock, LiveClockHandle};
pub use queue::EventQueue;

use crate::domain::Timestamp;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClockError {
    #[error("causality violation: {what} at {at} precedes current instant {now}")]
    CausalityViolation {
        what: String,
        at: Timestamp,
        now: Timestamp,
    },
}

impl ClockError {
    pub fn causality(what: impl Into<String>, at: Timestamp, now: Timestamp) -> Self {
        ClockError::CausalityViolation {
            what: what.into(),
            at,
            now,
        }
    }
}
