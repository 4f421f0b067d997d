//! Wakeable sleep for background workers
//!
//! A worker thread waits on a [`Signal`] between rounds; producers call
//! [`Signal::notify`] to cut the wait short when new work arrives or the
//! worker should shut down.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Edge-triggered wake-up flag
#[derive(Debug, Default)]
pub struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter, or make its next wait return immediately
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Sleep until notified or until `timeout` elapses
    ///
    /// Returns true if woken by a notification. The pending flag is consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_pending_notification_is_consumed() {
        let signal = Signal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let woken = signal.wait_timeout(Duration::from_secs(10));
                (woken, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.notify();

        let (woken, waited) = waiter.join().unwrap();
        assert!(woken);
        assert!(waited < Duration::from_secs(5));
    }
}
