//! Platform shim: the stall latch and processor count.
//!
//! Workers that find no work anywhere park on a single scheduler-wide
//! [`StallLatch`]. The latch is a condition variable with an internal
//! `should_wait` flag so that a wake-up issued between a worker deciding to
//! park and actually parking is not lost: the signal clears the flag, and a
//! late arrival sees it cleared and returns without sleeping. Each completed
//! wait re-arms the flag for the next parker.

use std::sync::{Condvar, Mutex};

/// Condvar-like latch with wake-up latching
pub(crate) struct StallLatch {
    should_wait: Mutex<bool>,
    wake: Condvar,
}

impl StallLatch {
    pub(crate) fn new() -> Self {
        Self {
            should_wait: Mutex::new(true),
            wake: Condvar::new(),
        }
    }

    /// Block until signalled. Returns immediately if a signal arrived since
    /// the last completed wait.
    pub(crate) fn wait(&self) {
        let mut armed = self.should_wait.lock().unwrap();
        while *armed {
            armed = self.wake.wait(armed).unwrap();
        }
        // Re-arm for the next parker.
        *armed = true;
    }

    /// Wake one parked worker.
    pub(crate) fn signal(&self) {
        let mut armed = self.should_wait.lock().unwrap();
        *armed = false;
        self.wake.notify_one();
    }

    /// Wake every parked worker.
    pub(crate) fn broadcast(&self) {
        let mut armed = self.should_wait.lock().unwrap();
        *armed = false;
        self.wake.notify_all();
    }
}

/// Hardware thread count
pub(crate) fn processor_count() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let latch = StallLatch::new();
        latch.signal();
        // Must return without another signal.
        latch.wait();
    }

    #[test]
    fn test_broadcast_releases_parked_thread() {
        let latch = Arc::new(StallLatch::new());
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let latch = Arc::clone(&latch);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                latch.wait();
                released.store(true, Ordering::SeqCst);
            })
        };

        // Keep broadcasting until the waiter reports through; the waiter may
        // not have parked yet when the first broadcast lands, which is
        // exactly the race the latch absorbs.
        while !released.load(Ordering::SeqCst) {
            latch.broadcast();
            thread::sleep(Duration::from_millis(1));
        }
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_rearms_after_wake() {
        let latch = Arc::new(StallLatch::new());
        latch.signal();
        latch.wait();
        // The previous wait consumed the wake-up and re-armed the latch, so
        // a fresh waiter must block until the next signal.
        let second = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!second.is_finished());
        while !second.is_finished() {
            latch.signal();
            thread::sleep(Duration::from_millis(1));
        }
        second.join().unwrap();
    }

    #[test]
    fn test_processor_count_is_positive() {
        assert!(processor_count() >= 1);
    }
}
