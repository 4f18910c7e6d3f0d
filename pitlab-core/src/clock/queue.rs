use super::event::{Event, EventPayload};
use super::ClockError;
use crate::domain::Timestamp;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Backtest scheduler: a min-heap of events plus the current instant.
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    now: Timestamp,
    next_seq: u64,
}

impl EventQueue {
    pub fn new(start: Timestamp) -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: start,
            next_seq: 0,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Schedule `payload` for delivery at `at`. Returns the event's sequence number.
    pub fn schedule(&mut self, payload: EventPayload, at: Timestamp) -> Result<u64, ClockError> {
        if at < self.now {
            return Err(ClockError::causality(
                format!("{:?} event", payload.class()),
                at,
                self.now,
            ));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event {
            at,
            class: payload.class(),
            seq,
            payload,
        }));
        Ok(seq)
    }

    /// Pop the earliest event and advance the current instant to it.
    pub fn pop_next(&mut self) -> Option<Event> {
        let Reverse(event) = self.heap.pop()?;
        self.now = event.at;
        Some(event)
    }

    pub fn peek_time(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Move the current instant forward without delivering anything.
    pub fn advance_to(&mut self, t: Timestamp) -> Result<(), ClockError> {
        if t < self.now {
            return Err(ClockError::causality("clock advance", t, self.now));
        }
        if let Some(next) = self.peek_time() {
            if next < t {
                return Err(ClockError::causality("pending event", next, t));
            }
        }
        self.now = t;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{EventClass, TimerKind};
    use crate::domain::{ExecutionReport, OrderId};
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    #[test]
    fn pops_in_time_order() {
        let mut q = EventQueue::new(t0());
        q.schedule(EventPayload::RebalanceTrigger, t0() + Duration::hours(2))
            .unwrap();
        q.schedule(EventPayload::RebalanceTrigger, t0() + Duration::hours(1))
            .unwrap();
        let first = q.pop_next().unwrap();
        assert_eq!(first.at, t0() + Duration::hours(1));
        assert_eq!(q.now(), first.at);
    }

    #[test]
    fn ties_break_by_class_then_insertion() {
        let mut q = EventQueue::new(t0());
        let at = t0() + Duration::minutes(5);
        q.schedule(EventPayload::Timer(TimerKind::Reconcile), at).unwrap();
        q.schedule(
            EventPayload::Execution(ExecutionReport::Ack {
                order_id: OrderId(1),
                at,
            }),
            at,
        )
        .unwrap();
        q.schedule(EventPayload::RebalanceTrigger, at).unwrap();
        q.schedule(
            EventPayload::Execution(ExecutionReport::CancelAck {
                order_id: OrderId(1),
                at,
            }),
            at,
        )
        .unwrap();

        let classes: Vec<_> = std::iter::from_fn(|| q.pop_next())
            .map(|e| (e.class, e.seq))
            .collect();
        assert_eq!(
            classes,
            vec![
                (EventClass::RebalanceTrigger, 2),
                (EventClass::ExecutionReport, 1),
                (EventClass::ExecutionReport, 3),
                (EventClass::Timer, 0),
            ]
        );
    }

    #[test]
    fn scheduling_in_the_past_is_causality_violation() {
        let mut q = EventQueue::new(t0());
        q.schedule(EventPayload::RebalanceTrigger, t0() + Duration::hours(1))
            .unwrap();
        q.pop_next();
        let err = q
            .schedule(EventPayload::RebalanceTrigger, t0())
            .unwrap_err();
        assert!(matches!(err, ClockError::CausalityViolation { .. }));
    }

    #[test]
    fn advance_cannot_skip_pending_events() {
        let mut q = EventQueue::new(t0());
        q.schedule(EventPayload::RebalanceTrigger, t0() + Duration::hours(1))
            .unwrap();
        assert!(q.advance_to(t0() + Duration::minutes(30)).is_ok());
        assert!(q.advance_to(t0() + Duration::hours(2)).is_err());
        assert!(q.advance_to(t0()).is_err());
    }
}
