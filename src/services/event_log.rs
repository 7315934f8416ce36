//! Bounded, newest-first event log

use crate::domain::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Number of events retained; older ones are evicted
pub const EVENT_LOG_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// Insert at the front, evicting the oldest entry when full
    pub fn append(&self, event: Event) {
        let mut events = self.events.lock();
        events.push_front(event);
        events.truncate(self.capacity);
    }

    /// Up to `limit` most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventKind;

    fn event(n: u64) -> Event {
        Event::new(EventKind::PickedUp, format!("dev{}", n), n)
    }

    #[test]
    fn test_newest_first() {
        let log = EventLog::new();
        log.append(event(1));
        log.append(event(2));
        log.append(event(3));

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ts, 3);
        assert_eq!(recent[1].ts, 2);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let log = EventLog::new();
        for n in 1..=EVENT_LOG_CAPACITY as u64 {
            log.append(event(n));
        }
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);

        log.append(event(101));
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);

        let all = log.recent(usize::MAX);
        assert_eq!(all.first().unwrap().ts, 101);
        assert_eq!(all.last().unwrap().ts, 2);
    }

    #[test]
    fn test_bound_holds_under_concurrent_appends() {
        let log = std::sync::Arc::new(EventLog::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        log.append(event(t * 1000 + n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
    }
}
