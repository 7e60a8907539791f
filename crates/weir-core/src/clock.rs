//! Lamport logical clock.
//!
//! Wall clocks on events come from arbitrary senders through multiple
//! relays and carry no ordering guarantee. The logical clock gives locally
//! produced events a total order that survives out-of-order delivery:
//! strictly incremented on every local event, max-merged with every
//! observed remote value.
//!
//! The clock is not persisted on its own; on restart it is reseeded by
//! scanning the stored event history for the largest `lamport` tag value.

use parking_lot::Mutex;

use crate::event::Event;

/// Process-wide monotonic logical clock.
///
/// The counter is the one piece of truly shared mutable state in the core;
/// the mutex serializes `now`/`observe` so the value never regresses even
/// when called from concurrent tasks.
#[derive(Debug, Default)]
pub struct LamportClock {
    time: Mutex<u64>,
}

impl LamportClock {
    /// A clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a clock from historical events, taking the maximum `lamport`
    /// tag value present. Events without the tag are ignored.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let max = events
            .into_iter()
            .filter_map(Event::lamport_timestamp)
            .max()
            .unwrap_or(0);
        Self {
            time: Mutex::new(max),
        }
    }

    /// Advance the clock and return the new value.
    ///
    /// Never returns the same value twice for one process.
    pub fn now(&self) -> u64 {
        let mut time = self.time.lock();
        *time += 1;
        *time
    }

    /// Merge an observed remote value: advance to `max(current, observed)`.
    /// Never decreases the clock.
    pub fn observe(&self, observed: u64) {
        let mut time = self.time.lock();
        if observed > *time {
            *time = observed;
        }
    }

    /// Current value without advancing. Mostly useful in tests.
    pub fn peek(&self) -> u64 {
        *self.time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LAMPORT_TAG, NoteKind};

    fn event_with_lamport(value: Option<&str>) -> Event {
        let tags = match value {
            Some(v) => vec![vec![LAMPORT_TAG.to_string(), v.to_string()]],
            None => vec![],
        };
        Event {
            id: String::new(),
            pubkey: String::new(),
            created_at: 0,
            kind: NoteKind::TextNote,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_now_strictly_increments() {
        let clock = LamportClock::new();
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn test_observe_never_regresses() {
        let clock = LamportClock::new();
        clock.observe(10);
        assert_eq!(clock.peek(), 10);
        clock.observe(4);
        assert_eq!(clock.peek(), 10);
        // now() after observe returns values beyond the observed one
        assert_eq!(clock.now(), 11);
    }

    #[test]
    fn test_from_events_takes_max() {
        let events = vec![
            event_with_lamport(Some("3")),
            event_with_lamport(None),
            event_with_lamport(Some("41")),
            event_with_lamport(Some("not-a-number")),
            event_with_lamport(Some("7")),
        ];
        let clock = LamportClock::from_events(&events);
        assert_eq!(clock.peek(), 41);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn test_from_empty_history_starts_at_zero() {
        let clock = LamportClock::from_events(&[]);
        assert_eq!(clock.now(), 1);
    }

    #[test]
    fn test_sequence_is_non_decreasing() {
        let clock = LamportClock::new();
        let mut last = 0;
        for step in 0..100u64 {
            if step % 3 == 0 {
                clock.observe(step * 2);
            }
            let value = clock.now();
            assert!(value > last);
            last = value;
        }
    }
}
