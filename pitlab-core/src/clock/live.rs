//! Real-time dispatcher for live mode.
//!
//! Producers (market data, broker callbacks, rebalance timers) push through
//! cloneable [`LiveClockHandle`]s into one consumer. Future-dated events wait
//! in a local [`EventQueue`]; the consumer suspends until something is due,
//! a new event arrives, or the heartbeat fires.

use super::event::{Event, EventPayload, TimerKind};
use super::queue::EventQueue;
use super::ClockError;
use crate::domain::Timestamp;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug)]
struct Submission {
    payload: EventPayload,
    at: Timestamp,
}

/// Producer side of the live clock.
#[derive(Debug, Clone)]
pub struct LiveClockHandle {
    tx: mpsc::UnboundedSender<Submission>,
    now: watch::Receiver<Timestamp>,
}

impl LiveClockHandle {
    /// The consumer's current instant.
    pub fn now(&self) -> Timestamp {
        *self.now.borrow()
    }

    /// Submit an event for delivery at `at`. Fails fast when `at` is already
    /// in the consumer's past; returns `false` once the clock has been dropped.
    pub fn submit(&self, payload: EventPayload, at: Timestamp) -> Result<bool, ClockError> {
        let now = self.now();
        if at < now {
            return Err(ClockError::causality(
                format!("{:?} submission", payload.class()),
                at,
                now,
            ));
        }
        Ok(self.tx.send(Submission { payload, at }).is_ok())
    }

    /// Submit stamped with the later of wall time and the consumer's instant.
    pub fn submit_now(&self, payload: EventPayload) -> Result<bool, ClockError> {
        let at = Utc::now().max(self.now());
        self.submit(payload, at)
    }
}

/// Consumer side of the live clock. Exactly one exists per session.
pub struct LiveClock {
    rx: mpsc::UnboundedReceiver<Submission>,
    queue: EventQueue,
    now_tx: watch::Sender<Timestamp>,
    heartbeat: Interval,
    closed: bool,
}

impl LiveClock {
    /// Create the clock and its first producer handle.
    pub fn new(heartbeat_period: Duration) -> (Self, LiveClockHandle) {
        let start = Utc::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let (now_tx, now_rx) = watch::channel(start);
        let period = heartbeat_period.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let clock = Self {
            rx,
            queue: EventQueue::new(start),
            now_tx,
            heartbeat,
            closed: false,
        };
        (clock, LiveClockHandle { tx, now: now_rx })
    }

    pub fn now(&self) -> Timestamp {
        self.queue.now()
    }

    /// Schedule from the consumer side, e.g. reports produced while handling
    /// an event. Holds no producer slot, so it never delays shutdown.
    pub fn schedule(&mut self, payload: EventPayload, at: Timestamp) -> Result<u64, ClockError> {
        self.queue.schedule(payload, at)
    }

    /// Wait for the next due event.
    ///
    /// Returns `Ok(None)` once every handle is dropped and nothing is pending.
    pub async fn pop_next(&mut self) -> Result<Option<Event>, ClockError> {
        loop {
            let wall = Utc::now();
            if let Some(next) = self.queue.peek_time() {
                if next <= wall {
                    let event = self.queue.pop_next();
                    self.publish_now();
                    return Ok(event);
                }
            }
            if self.closed && self.queue.is_empty() {
                debug!("live clock drained");
                return Ok(None);
            }

            let wait = self
                .queue
                .peek_time()
                .map(|t| (t - wall).to_std().unwrap_or_default());

            tokio::select! {
                msg = self.rx.recv(), if !self.closed => match msg {
                    Some(Submission { payload, at }) => {
                        // Stamped against an instant the consumer has since
                        // passed: deliver now rather than abort the session.
                        let now = self.queue.now();
                        if at < now {
                            debug!(class = ?payload.class(), %at, %now, "late live submission, delivering now");
                        }
                        self.queue.schedule(payload, at.max(now))?;
                    }
                    None => self.closed = true,
                },
                _ = self.heartbeat.tick() => {
                    let at = Utc::now().max(self.queue.now());
                    self.queue.schedule(EventPayload::Timer(TimerKind::Heartbeat), at)?;
                }
                _ = sleep_for(wait) => {}
            }
        }
    }

    fn publish_now(&self) {
        // send_replace never fails, even with no receivers
        self.now_tx.send_replace(self.queue.now());
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::EventClass;

    #[tokio::test]
    async fn delivers_submissions_then_drains() {
        let (mut clock, handle) = LiveClock::new(Duration::from_secs(3600));
        let at = Utc::now();
        handle.submit(EventPayload::RebalanceTrigger, at).unwrap();
        handle
            .submit(EventPayload::Timer(TimerKind::Reconcile), at)
            .unwrap();
        drop(handle);

        let first = clock.pop_next().await.unwrap().unwrap();
        let second = clock.pop_next().await.unwrap().unwrap();
        assert_eq!(first.class, EventClass::RebalanceTrigger);
        assert_eq!(second.class, EventClass::Timer);
        assert!(clock.pop_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handle_rejects_past_submissions() {
        let (mut clock, handle) = LiveClock::new(Duration::from_secs(3600));
        let at = Utc::now();
        handle.submit(EventPayload::RebalanceTrigger, at).unwrap();
        clock.pop_next().await.unwrap().unwrap();

        let stale = at - chrono::Duration::seconds(10);
        assert!(handle.submit(EventPayload::RebalanceTrigger, stale).is_err());
    }

    #[tokio::test]
    async fn submission_overtaken_by_the_consumer_is_delivered_now() {
        let (mut clock, handle) = LiveClock::new(Duration::from_secs(3600));
        let stamped = handle.now();
        handle.submit(EventPayload::RebalanceTrigger, stamped).unwrap();

        // The consumer moves on before it drains the channel.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let later = Utc::now();
        clock.queue.advance_to(later).unwrap();

        let event = clock.pop_next().await.unwrap().unwrap();
        assert_eq!(event.class, EventClass::RebalanceTrigger);
        assert_eq!(event.at, later);
        assert!(event.at > stamped);
    }

    #[tokio::test]
    async fn heartbeat_fires_when_idle() {
        let (mut clock, _handle) = LiveClock::new(Duration::from_millis(10));
        let event = clock.pop_next().await.unwrap().unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::Timer(TimerKind::Heartbeat)
        ));
    }
}
