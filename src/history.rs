//! Bounded, time-windowed log of recently emitted messages.
//!
//! The buffer is passive: it is filled and pruned but nothing consults it to
//! suppress inbound commands.

use std::collections::VecDeque;
use std::time::Duration;

use crate::codec::{EventKind, NetworkMessage};

pub const HISTORY_CAPACITY: usize = 100;
pub const HISTORY_WINDOW: Duration = Duration::from_millis(100);
/// Interval for the periodic idle sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub address: String,
    pub args: Vec<i32>,
    pub kind: EventKind,
    pub emitted_at: Duration,
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    records: VecDeque<SentRecord>,
    capacity: usize,
    window: Duration,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_limits(HISTORY_CAPACITY, HISTORY_WINDOW)
    }

    pub fn with_limits(capacity: usize, window: Duration) -> Self {
        HistoryBuffer {
            records: VecDeque::with_capacity(capacity),
            capacity,
            window,
        }
    }

    /// Append a record, dropping the oldest when full.
    pub fn record(&mut self, message: &NetworkMessage, kind: EventKind, emitted_at: Duration) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(SentRecord {
            address: message.address.clone(),
            args: message.args.clone(),
            kind,
            emitted_at,
        });
    }

    /// Remove every record older than the window at `now`. Returns how many
    /// were removed.
    pub fn evict_stale(&mut self, now: Duration) -> usize {
        let before = self.records.len();
        let window = self.window;
        self.records
            .retain(|r| now.saturating_sub(r.emitted_at) <= window);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SentRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: i32) -> NetworkMessage {
        NetworkMessage::new("/ch1note", vec![n])
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn sweep_keeps_only_recent_records() {
        let t = ms(1_000);
        let mut history = HistoryBuffer::new();
        history.record(&msg(1), EventKind::NoteOn, t);
        history.record(&msg(2), EventKind::NoteOn, t + ms(50));
        history.record(&msg(3), EventKind::NoteOn, t + ms(120));

        let removed = history.evict_stale(t + ms(150));

        assert_eq!(removed, 1);
        let kept: Vec<i32> = history.iter().map(|r| r.args[0]).collect();
        assert_eq!(kept, vec![2, 3]);
        assert!(history
            .iter()
            .all(|r| (t + ms(150)) - r.emitted_at <= HISTORY_WINDOW));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut history = HistoryBuffer::new();
        for i in 0..1_000 {
            history.record(&msg(i), EventKind::NoteOn, Duration::ZERO);
            assert!(history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next().unwrap().args[0], 900);
    }

    #[test]
    fn idle_sweep_empties_buffer() {
        let mut history = HistoryBuffer::new();
        history.record(&msg(1), EventKind::NoteOff, ms(0));
        assert_eq!(history.evict_stale(ms(100)), 0);
        assert_eq!(history.evict_stale(ms(101)), 1);
        assert!(history.is_empty());
    }

    #[test]
    fn records_from_the_future_survive() {
        let mut history = HistoryBuffer::new();
        history.record(&msg(1), EventKind::ControlChange, ms(500));
        assert_eq!(history.evict_stale(ms(10)), 0);
        assert_eq!(history.len(), 1);
    }
}
