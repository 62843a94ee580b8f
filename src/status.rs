//! Status log sink for front ends.
//!
//! Emitters never block: lines go into a bounded lock-free queue and the
//! oldest line is discarded when the queue is full. Every line is also
//! forwarded to the `log` facade.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use log::{debug, error, warn};

pub const STATUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct StatusLog {
    queue: Arc<ArrayQueue<String>>,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLog")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl StatusLog {
    pub fn new() -> Self {
        Self::with_capacity(STATUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StatusLog {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    pub fn info(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "e_oscmidi::status", "{}", line);
        self.queue.force_push(line);
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        warn!(target: "e_oscmidi::status", "{}", line);
        self.queue.force_push(line);
    }

    pub fn error(&self, line: impl Into<String>) {
        let line = line.into();
        error!(target: "e_oscmidi::status", "{}", line);
        self.queue.force_push(line);
    }

    pub fn pop(&self) -> Option<String> {
        self.queue.pop()
    }

    /// Take every pending line, oldest first.
    pub fn drain(&self) -> Vec<String> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order() {
        let log = StatusLog::new();
        log.info("one");
        log.warn("two");
        log.error("three");
        assert_eq!(log.drain(), vec!["one", "two", "three"]);
        assert!(log.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let log = StatusLog::with_capacity(2);
        log.info("a");
        log.info("b");
        log.info("c");
        assert_eq!(log.drain(), vec!["b", "c"]);
    }

    #[test]
    fn clones_share_queue_across_threads() {
        let log = StatusLog::new();
        let producer = log.clone();
        std::thread::spawn(move || producer.info("from thread"))
            .join()
            .unwrap();
        assert_eq!(log.pop().as_deref(), Some("from thread"));
    }
}
