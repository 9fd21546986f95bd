//! Cross-thread wake/sleep protocol on a shared integer cell.
//!
//! # Protocol
//!
//! The cell holds `IDLE` (0) or `SIGNALED` (1). Only the producer stores
//! `SIGNALED` and notifies; only the consumer blocks and resets to `IDLE`
//! after waking. The producer side (`store` + `notify`) never takes the
//! lock and never blocks — the condvar's internal mutex is touched only by
//! the waiting consumer.
//!
//! A notify that races a consumer entering its wait is absorbed by two
//! mechanisms: the producer re-signals on every quantum while a batch is
//! pending, and `wait_if_equal` takes a bounded timeout. A missed wakeup
//! therefore costs at most one timeout period, never a deadlock.
//!
//! # Shutdown
//!
//! `close()` stores the `CLOSED` sentinel and wakes all waiters;
//! `wait_if_equal` reports `WaitOutcome::Closed` and the worker loop exits.
//! Without this the consumer would block forever at session teardown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cell value meaning "no work pending".
pub const IDLE: u32 = 0;
/// Cell value meaning "a batch is ready".
pub const SIGNALED: u32 = 1;
/// Sentinel stored by `close()`. Never stored via `store()`.
pub const CLOSED: u32 = u32::MAX;

/// Result of one blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The cell no longer holds the expected value.
    Changed,
    /// The timeout elapsed with the cell unchanged.
    TimedOut,
    /// The signal was closed; no further waits will block.
    Closed,
}

/// A binary wake signal shared between one producer and one consumer.
pub struct WakeSignal {
    value: AtomicU32,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            value: AtomicU32::new(IDLE),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Current cell value.
    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Store a value without waking anyone. Lock-free; safe on the
    /// real-time thread. Ignored once the signal is closed. A store racing
    /// `close()` can land after the sentinel; the worker loop still exits
    /// via its running flag within one wait timeout.
    pub fn store(&self, value: u32) {
        debug_assert_ne!(value, CLOSED, "use close() for shutdown");
        if self.value.load(Ordering::Relaxed) == CLOSED {
            return;
        }
        self.value.store(value, Ordering::Release);
    }

    /// Wake up to `wake_count` waiters. Lock-free on this side; the store
    /// of the new cell value must happen before the call (`store` first).
    ///
    /// Returns how many threads were actually woken.
    pub fn notify(&self, wake_count: u32) -> usize {
        match wake_count {
            0 => 0,
            1 => usize::from(self.condvar.notify_one()),
            _ => self.condvar.notify_all(),
        }
    }

    /// Block while the cell holds `expected`, until it changes, the timeout
    /// elapses, or the signal is closed.
    ///
    /// Only the consumer thread may call this.
    pub fn wait_if_equal(&self, expected: u32, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            match self.value.load(Ordering::Acquire) {
                CLOSED => return WaitOutcome::Closed,
                v if v != expected => return WaitOutcome::Changed,
                _ => {}
            }
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                // One last look: a signal stored right at the deadline still
                // counts as a change.
                return match self.value.load(Ordering::Acquire) {
                    CLOSED => WaitOutcome::Closed,
                    v if v != expected => WaitOutcome::Changed,
                    _ => WaitOutcome::TimedOut,
                };
            }
        }
    }

    /// Permanently close the signal and wake every waiter.
    pub fn close(&self) {
        self.value.store(CLOSED, Ordering::Release);
        self.condvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.value.load(Ordering::Acquire) == CLOSED
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_changed_when_already_signaled() {
        let signal = WakeSignal::new();
        signal.store(SIGNALED);
        assert_eq!(
            signal.wait_if_equal(IDLE, Duration::from_millis(10)),
            WaitOutcome::Changed
        );
    }

    #[test]
    fn wait_times_out_when_nothing_happens() {
        let signal = WakeSignal::new();
        let outcome = signal.wait_if_equal(IDLE, Duration::from_millis(20));
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn notify_wakes_a_blocked_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let waiter_signal = Arc::clone(&signal);

        let waiter = thread::spawn(move || {
            waiter_signal.wait_if_equal(IDLE, Duration::from_secs(5))
        });

        // Give the waiter time to actually block.
        thread::sleep(Duration::from_millis(20));
        signal.store(SIGNALED);
        signal.notify(1);

        assert_eq!(waiter.join().expect("waiter panicked"), WaitOutcome::Changed);
        assert_eq!(signal.load(), SIGNALED);
    }

    #[test]
    fn close_unblocks_and_stays_closed() {
        let signal = Arc::new(WakeSignal::new());
        let waiter_signal = Arc::clone(&signal);

        let waiter = thread::spawn(move || {
            waiter_signal.wait_if_equal(IDLE, Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(20));
        signal.close();

        assert_eq!(waiter.join().expect("waiter panicked"), WaitOutcome::Closed);
        assert!(signal.is_closed());
        // Subsequent waits return immediately.
        assert_eq!(
            signal.wait_if_equal(IDLE, Duration::from_millis(1)),
            WaitOutcome::Closed
        );
    }

    #[test]
    fn consumer_reset_reopens_the_wait() {
        let signal = WakeSignal::new();
        signal.store(SIGNALED);
        assert_eq!(
            signal.wait_if_equal(IDLE, Duration::from_millis(5)),
            WaitOutcome::Changed
        );
        signal.store(IDLE);
        assert_eq!(
            signal.wait_if_equal(IDLE, Duration::from_millis(5)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn store_after_close_is_ignored() {
        let signal = WakeSignal::new();
        signal.close();
        signal.store(SIGNALED);
        assert!(signal.is_closed());
    }

    #[test]
    fn notify_reports_zero_without_waiters() {
        let signal = WakeSignal::new();
        assert_eq!(signal.notify(1), 0);
        assert_eq!(signal.notify(0), 0);
    }
}
