//! Delayed game events
//!
//! Payout announcements and betting closure are held back for a configured
//! delay. Expired entries are split off in a separate pass after every
//! countdown has been decremented, so removing one entry can never skip or
//! double-fire its neighbour.

use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    BettingClosed,
    FirstBlood,
    FirstSuicide,
    MatchEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedEvent {
    pub kind: EventKind,
    /// Player the event resolves to, if any
    pub winner: Option<String>,
    pub remaining: Duration,
}

#[derive(Debug, Default)]
pub struct EventScheduler {
    events: Vec<DelayedEvent>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: EventKind, winner: Option<String>, delay: Duration) {
        debug!("Scheduled {:?} ({:?}) in {:?}", kind, winner, delay);
        self.events.push(DelayedEvent {
            kind,
            winner,
            remaining: delay,
        });
    }

    /// Count every entry down by `delta` and return the ones that expired,
    /// in the order they were scheduled.
    pub fn advance(&mut self, delta: Duration) -> Vec<DelayedEvent> {
        for event in &mut self.events {
            event.remaining = event.remaining.saturating_sub(delta);
        }

        let (fired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| e.remaining.is_zero());
        self.events = pending;
        fired
    }

    /// Remove every entry regardless of time left, in schedule order
    pub fn drain(&mut self) -> Vec<DelayedEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending(&self) -> &[DelayedEvent] {
        &self.events
    }

    pub fn is_pending(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
