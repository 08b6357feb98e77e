//! Readiness notification surface a connection exposes to whatever socket
//! framework sits above it, mirroring `rpmsg_socket_poll`'s fixed
//! `fds[CONFIG_NET_RPMSG_NPOLLWAITERS]` array and linear-scan notify.

use std::sync::{Arc, Mutex};

/// Max simultaneous poll registrations per connection, matching
/// `CONFIG_NET_RPMSG_NPOLLWAITERS`'s role as a compile-time cap.
pub const NPOLLWAITERS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollEvents(u8);

impl PollEvents {
    pub const READABLE: PollEvents = PollEvents(0b001);
    pub const WRITABLE: PollEvents = PollEvents(0b010);
    pub const HANGUP: PollEvents = PollEvents(0b100);
    pub const NONE: PollEvents = PollEvents(0);

    pub fn contains(self, other: PollEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PollEvents {
    type Output = PollEvents;
    fn bitor(self, rhs: PollEvents) -> PollEvents {
        PollEvents(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: PollEvents) {
        self.0 |= rhs.0;
    }
}

/// Registered against a connection's poll slot array; `notify` fires
/// whenever readiness changes in a way the registrant asked about.
pub trait PollWaiter: Send + Sync {
    fn notify(&self, events: PollEvents);
}

/// Opaque handle returned by [`PollSet::register`], used to unregister on
/// teardown (`rpmsg_socket_poll`'s `setup == false` path).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSlot(usize);

#[derive(Default)]
pub struct PollSet {
    waiters: Mutex<[Option<Arc<dyn PollWaiter>>; NPOLLWAITERS]>,
}

impl PollSet {
    pub fn new() -> Self {
        Self { waiters: Mutex::new(Default::default()) }
    }

    /// Registers a waiter in the first free slot. Returns `None` once all
    /// `NPOLLWAITERS` slots are taken, matching the original driver's
    /// `ENOMEM` on a full `fds` array.
    pub fn register(&self, waiter: Arc<dyn PollWaiter>) -> Option<PollSlot> {
        let mut waiters = self.waiters.lock().unwrap();
        let idx = waiters.iter().position(Option::is_none)?;
        waiters[idx] = Some(waiter);
        Some(PollSlot(idx))
    }

    pub fn unregister(&self, slot: PollSlot) {
        let mut waiters = self.waiters.lock().unwrap();
        waiters[slot.0] = None;
    }

    /// Notifies every occupied slot of the current readiness set.
    pub fn notify(&self, events: PollEvents) {
        if events.is_empty() {
            return;
        }
        let waiters = self.waiters.lock().unwrap();
        for waiter in waiters.iter().flatten() {
            waiter.notify(events);
        }
    }
}

impl std::fmt::Debug for PollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let waiters = self.waiters.lock().unwrap();
        let used = waiters.iter().filter(|w| w.is_some()).count();
        f.debug_struct("PollSet").field("registered", &used).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;

    struct Recorder(AtomicU8);

    impl PollWaiter for Recorder {
        fn notify(&self, events: PollEvents) {
            self.0.fetch_or(if events.contains(PollEvents::READABLE) { 1 } else { 0 }, Ordering::SeqCst);
        }
    }

    #[test]
    fn notify_reaches_registered_waiter() {
        let set = PollSet::new();
        let recorder = Arc::new(Recorder(AtomicU8::new(0)));
        set.register(recorder.clone()).unwrap();

        set.notify(PollEvents::READABLE);

        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_waiter_is_not_notified() {
        let set = PollSet::new();
        let recorder = Arc::new(Recorder(AtomicU8::new(0)));
        let slot = set.register(recorder.clone()).unwrap();
        set.unregister(slot);

        set.notify(PollEvents::READABLE);

        assert_eq!(recorder.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_fails_once_full() {
        let set = PollSet::new();
        for _ in 0..NPOLLWAITERS {
            let recorder = Arc::new(Recorder(AtomicU8::new(0)));
            assert!(set.register(recorder).is_some());
        }
        let one_more = Arc::new(Recorder(AtomicU8::new(0)));
        assert!(set.register(one_more).is_none());
    }
}
