//! Counting wake signal used for interruptible sleeps.
//!
//! Each `post` lets exactly one `wait`/`wait_timeout` return early, so a
//! worker woken for three enqueued jobs runs three iterations before it
//! sleeps for real.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct WakeSignal {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *permits += 1;
        self.cond.notify_one();
    }

    /// Block until a permit is available and take it.
    pub fn wait(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *permits == 0 {
            permits = self
                .cond
                .wait(permits)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *permits -= 1;
    }

    /// Wait up to `timeout` for a permit. Returns `true` if woken by a post,
    /// `false` on plain timeout. A timeout past the clock's range waits
    /// without a deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(permits, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            permits = guard;
        }
        *permits -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_timeout_without_post() {
        let signal = WakeSignal::new();
        let started = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_posts_are_counted() {
        let signal = WakeSignal::new();
        signal.post();
        signal.post();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_unbounded_timeout_waits_for_post() {
        let signal = Arc::new(WakeSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.post();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_post_wakes_sleeping_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        signal.post();
        assert!(waiter.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
