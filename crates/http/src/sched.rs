//! Cooperative timer queue.
//!
//! Events are kept in a flat slot list. [`Scheduler::run`] fires every due event and returns the
//! delay until the next one so the caller can bound its poll timeout. The callback receives the
//! scheduler itself and may schedule or cancel entries; the scan restarts after every fired event.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::arena::{Arena, Handle};

/// Handle to a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Handle);

#[derive(Debug)]
struct Entry<E> {
    due: Instant,
    event: E,
}

#[derive(Debug)]
pub struct Scheduler<E> {
    entries: Arena<Entry<E>>,
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self { entries: Arena::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, event: E) -> TimerId {
        let id = TimerId(self.entries.insert(Entry { due: now + delay, event }));
        trace!(timer = ?id.0, delay_ms = delay.as_millis(), "schedule event");
        id
    }

    /// Moves an existing event to a new due time. Returns false if the id is stale.
    pub fn reschedule(&mut self, id: TimerId, now: Instant, delay: Duration) -> bool {
        match self.entries.get_mut(id.0) {
            Some(entry) => {
                entry.due = now + delay;
                true
            }
            None => false,
        }
    }

    /// Cancels an event. Cancelling a fired or unknown id is a no-op.
    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        self.entries.remove(id.0).map(|entry| entry.event)
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.entries.contains(id.0)
    }

    /// Removes and returns the earliest event that is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, E)> {
        let (handle, _) = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.due <= now)
            .min_by_key(|(_, entry)| entry.due)?;
        self.entries.remove(handle).map(|entry| (TimerId(handle), entry.event))
    }

    /// Delay until the earliest pending event, zero if one is already due.
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        self.entries.iter().map(|(_, entry)| entry.due.saturating_duration_since(now)).min()
    }

    /// Fires every due event, then reports the delay until the next one.
    pub fn run(&mut self, now: Instant, mut fire: impl FnMut(&mut Self, TimerId, E)) -> Option<Duration> {
        while let Some((id, event)) = self.pop_due(now) {
            trace!(timer = ?id.0, "fire event");
            fire(self, id, event);
        }
        self.next_delay(now)
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_due_order() {
        let now = Instant::now();
        let mut sched = Scheduler::new();
        sched.schedule(now, Duration::from_millis(20), "late");
        sched.schedule(now, Duration::from_millis(10), "early");
        sched.schedule(now, Duration::from_secs(5), "future");

        let mut fired = Vec::new();
        let next = sched.run(now + Duration::from_millis(30), |_, _, e| fired.push(e));
        assert_eq!(fired, ["early", "late"]);
        assert_eq!(sched.len(), 1);
        assert!(next.is_some_and(|d| d > Duration::from_secs(4)));
    }

    #[test]
    fn test_cancel_is_safe_when_stale() {
        let now = Instant::now();
        let mut sched = Scheduler::new();
        let id = sched.schedule(now, Duration::ZERO, 1);
        assert_eq!(sched.pop_due(now).map(|(_, e)| e), Some(1));
        assert_eq!(sched.cancel(id), None);
        assert!(!sched.reschedule(id, now, Duration::ZERO));

        let other = sched.schedule(now, Duration::from_secs(1), 2);
        assert_eq!(sched.cancel(id), None);
        assert!(sched.is_scheduled(other));
    }

    #[test]
    fn test_callback_may_mutate_queue() {
        let now = Instant::now();
        let mut sched = Scheduler::new();
        sched.schedule(now, Duration::ZERO, 1);
        let victim = sched.schedule(now, Duration::ZERO, 2);

        let mut fired = Vec::new();
        sched.run(now, |s, _, e| {
            fired.push(e);
            if e == 1 {
                s.cancel(victim);
                s.schedule(now, Duration::ZERO, 3);
            }
        });
        assert_eq!(fired, [1, 3]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_next_delay_empty() {
        let sched: Scheduler<()> = Scheduler::new();
        assert_eq!(sched.next_delay(Instant::now()), None);
    }
}
