//! Condvar-based parking for platforms without futex

use super::WorkerParking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Portable parking built on `std::sync::Condvar`
pub struct FallbackParking {
    /// true = wake pending
    wake_pending: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            wake_pending: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.wake_pending.lock().unwrap();

        if *pending {
            *pending = false;
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let woken = match timeout {
            Some(t) => {
                let (guard, result) = self.condvar.wait_timeout(pending, t).unwrap();
                pending = guard;
                !result.timed_out()
            }
            None => {
                pending = self.condvar.wait(pending).unwrap();
                true
            }
        };

        if *pending {
            *pending = false;
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }
        *self.wake_pending.lock().unwrap() = true;
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }
        *self.wake_pending.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
