//! Blocking wait support for application threads.
//!
//! A [`Signaler`] is installed as the [`PipeEvents`] hook on every socket-side
//! pipe end. Notifications bump an atomic generation counter; the mutex and
//! condvar are only touched when an application thread is actually parked,
//! so reactor threads never contend on a lock in the common case.

use crate::pipe::{PipeEvents, PipeId};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct Signaler {
    generation: AtomicU64,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Signaler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation. Take it before polling, then pass it to
    /// [`wait`](Self::wait) so a notification in between is not lost.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }

    /// Park until the generation moves past `seen` or `deadline` passes.
    ///
    /// Returns `false` on timeout.
    pub fn wait(&self, seen: u64, deadline: Option<Instant>) -> bool {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        let woken = loop {
            if self.generation.load(Ordering::SeqCst) != seen {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        break self.generation.load(Ordering::SeqCst) != seen;
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        };
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        woken
    }
}

impl PipeEvents for Signaler {
    fn read_activated(&self, _pipe: PipeId) {
        self.notify();
    }

    fn write_activated(&self, _pipe: PipeId) {
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_times_out_without_notification() {
        let signaler = Signaler::new();
        let seen = signaler.generation();
        let start = Instant::now();
        assert!(!signaler.wait(seen, Some(start + Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn notification_before_wait_is_not_lost() {
        let signaler = Signaler::new();
        let seen = signaler.generation();
        signaler.notify();
        assert!(signaler.wait(seen, Some(Instant::now())));
    }

    #[test]
    fn wakes_parked_thread() {
        let signaler = Arc::new(Signaler::new());
        let seen = signaler.generation();

        let waiter = {
            let signaler = Arc::clone(&signaler);
            thread::spawn(move || signaler.wait(seen, Some(Instant::now() + Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        signaler.notify();
        assert!(waiter.join().unwrap());
    }
}
