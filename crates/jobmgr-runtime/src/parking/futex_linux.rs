//! Linux futex-based parking
//!
//! Futex word: 0 = no wake pending, 1 = wake pending. Parkers FUTEX_WAIT
//! while the word is 0; wakers set it, FUTEX_WAKE, and the woken side
//! consumes the flag.

use super::WorkerParking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Futex-backed worker parking
pub struct FutexParking {
    /// 0 = sleep, 1 = wake pending
    futex: AtomicU32,

    /// Parked-worker count, used to skip no-op wakes
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_call(&self, op: libc::c_int, val: u32, timeout: *const libc::timespec) -> i64 {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                op | libc::FUTEX_PRIVATE_FLAG,
                val,
                timeout,
                std::ptr::null::<u32>(),
                0u32,
            ) as i64
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        // a pending wake is consumed without sleeping
        if self.futex.swap(0, Ordering::AcqRel) != 0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as i64,
            tv_nsec: d.subsec_nanos() as i64,
        });
        let timespec_ptr = timespec
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        // FUTEX_WAIT: sleep only while the word is still 0
        let result = self.futex_call(libc::FUTEX_WAIT, 0, timespec_ptr);

        self.parked.fetch_sub(1, Ordering::SeqCst);

        if result == 0 {
            true
        } else {
            // ETIMEDOUT, EAGAIN (word changed first) and EINTR all mean
            // "not woken by a wake call"
            let errno = unsafe { *libc::__errno_location() };
            errno != libc::ETIMEDOUT && errno != libc::EAGAIN && errno != libc::EINTR
        }
    }

    fn wake_one(&self) {
        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }
        self.futex.store(1, Ordering::Release);
        self.futex_call(libc::FUTEX_WAKE, 1, std::ptr::null());
    }

    fn wake_all(&self) {
        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }
        self.futex.store(1, Ordering::Release);
        self.futex_call(libc::FUTEX_WAKE, i32::MAX as u32, std::ptr::null());
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}

// Safety: only atomics inside
unsafe impl Send for FutexParking {}
unsafe impl Sync for FutexParking {}
