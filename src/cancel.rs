//! Cooperative cancellation for the background threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

const JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared flag a task checks at each loop iteration. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is already cancelled.
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Block for up to `timeout`, returning early if cancelled.
    /// Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let mut guard = self.inner.lock.lock();
        if !self.is_cancelled() {
            self.inner.wake.wait_for(&mut guard, timeout);
        }
        self.is_cancelled()
    }
}

/// Join `handle`, giving up after `timeout`. A thread that has not finished
/// by then is detached rather than killed; `None` is returned in that case
/// or when the thread panicked.
pub fn join_bounded<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(JOIN_POLL);
    }
    handle.join().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_cancelled_token_reports_cancelled() {
        let token = CancellationToken::cancelled();
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(join_bounded(handle, Duration::from_secs(2)), Some(true));
    }

    #[test]
    fn join_bounded_gives_up_on_stuck_thread() {
        let token = CancellationToken::new();
        let stuck = token.clone();
        let handle = thread::spawn(move || {
            stuck.wait_timeout(Duration::from_secs(30));
        });
        assert!(join_bounded(handle, Duration::from_millis(30)).is_none());
        token.cancel();
    }
}
