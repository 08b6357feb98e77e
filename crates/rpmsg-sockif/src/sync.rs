//! The "post-saturating" wakeup primitive spec.md's concurrency model calls
//! for: posting never accumulates credits past one outstanding wakeup, and a
//! waiter that wakes must re-check the condition it was waiting on rather
//! than assume the post it saw is still the only one pending.
//!
//! Mirrors `rpmsg_socket_post`'s `nxsem_get_value(sem, &sval); if (sval < 1)
//! nxsem_post(sem);` guard, built on a `Mutex`+`Condvar` pair per spec.md's
//! CONCURRENCY & RESOURCE MODEL ("blocking waits are implemented with a
//! condition variable guarded by the connection's lock").

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum WaitOutcome {
    Woken,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct LevelSemaphore {
    set: Mutex<bool>,
    cv: Condvar,
}

impl LevelSemaphore {
    pub fn new() -> Self {
        Self { set: Mutex::new(false), cv: Condvar::new() }
    }

    /// Sets the level and wakes waiters, but only if it was not already set.
    /// A second `post` before anyone consumes the first is a no-op, which is
    /// exactly the coalescing the name-service/flow-control paths rely on.
    pub fn post(&self) {
        let mut set = self.set.lock().unwrap();
        if !*set {
            *set = true;
            self.cv.notify_all();
        }
    }

    /// Clears the level without waiting, used when a caller discovers the
    /// condition it was about to wait for no longer holds.
    pub fn reset(&self) {
        *self.set.lock().unwrap() = false;
    }

    /// Blocks until `post` has been called at least once since the last
    /// successful `wait`, or until `timeout` elapses. `None` blocks forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut set = self.set.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            if *set {
                *set = false;
                return WaitOutcome::Woken;
            }

            set = match deadline {
                None => self.cv.wait(set).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    let (guard, result) = self.cv.wait_timeout(set, deadline - now).unwrap();
                    if result.timed_out() && !*guard {
                        return WaitOutcome::TimedOut;
                    }
                    guard
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn post_then_wait_returns_immediately() {
        let sem = LevelSemaphore::new();
        sem.post();
        assert!(matches!(sem.wait(Some(Duration::from_millis(10))), WaitOutcome::Woken));
    }

    #[test]
    fn repeated_posts_before_wait_coalesce() {
        let sem = LevelSemaphore::new();
        sem.post();
        sem.post();
        sem.post();
        assert!(matches!(sem.wait(Some(Duration::from_millis(10))), WaitOutcome::Woken));
        assert!(matches!(sem.wait(Some(Duration::from_millis(10))), WaitOutcome::TimedOut));
    }

    #[test]
    fn wait_times_out_without_post() {
        let sem = LevelSemaphore::new();
        assert!(matches!(sem.wait(Some(Duration::from_millis(5))), WaitOutcome::TimedOut));
    }

    #[test]
    fn post_wakes_a_blocked_waiter() {
        let sem = Arc::new(LevelSemaphore::new());
        let waiter = Arc::clone(&sem);
        let handle = thread::spawn(move || waiter.wait(None));

        thread::sleep(Duration::from_millis(20));
        sem.post();

        assert!(matches!(handle.join().unwrap(), WaitOutcome::Woken));
    }
}
