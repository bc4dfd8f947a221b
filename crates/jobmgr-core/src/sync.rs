//! Word-sized job synchronization variable
//!
//! A `SyncVar` tracks one job's running/finished state in a single
//! `AtomicU32` and only provisions a blocking primitive when a second
//! party actually waits while the job is still running.
//!
//! Word encoding:
//!
//! ```text
//! 0            - not started / finished
//! 1            - running
//! even, > 1    - running with a waiter attached; the value is
//!                (semaphore_handle_raw + 1) << 1
//! ```
//!
//! The discriminant lives in the low bit: `1` (odd) is the plain running
//! state, any even non-zero value carries a pool handle. Every state
//! transition is a single compare-and-swap, so a racer always observes
//! the state and its attached waiter atomically.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::semaphore::{SemaphoreHandle, SemaphorePool};

// The queue shares this word encoding for its packed (state, cursor) pair.
pub(crate) const FINISHED: u32 = 0;
pub(crate) const RUNNING: u32 = 1;

#[inline]
pub(crate) fn encode_waiter(handle: SemaphoreHandle) -> u32 {
    // handle raw stays below 2^30 (see SemaphoreHandle), so this cannot
    // collide with FINISHED or RUNNING
    (handle.raw() + 1) << 1
}

#[inline]
pub(crate) fn decode_waiter(word: u32) -> SemaphoreHandle {
    debug_assert!(word > RUNNING && word & 1 == 0);
    SemaphoreHandle::from_raw((word >> 1) - 1)
}

/// Atomic running/finished flag with lazy waiter attach
///
/// Embedded in job states and in the producer/consumer queue header.
/// All waiting goes through a `SemaphorePool` passed in explicitly;
/// the variable never owns a semaphore across operations.
#[derive(Debug)]
pub struct SyncVar {
    word: AtomicU32,
}

impl SyncVar {
    /// A fresh, not-started variable
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(FINISHED),
        }
    }

    /// Mark the job running
    ///
    /// Must be called before the job is published to any other thread;
    /// the store is plain because no concurrent reader can exist yet.
    /// Calling this on a word that is not zero is a programming error.
    pub fn set_running(&self) {
        let prev = self.word.load(Ordering::Relaxed);
        assert_eq!(prev, FINISHED, "set_running on a live sync variable");
        self.word.store(RUNNING, Ordering::Release);
    }

    /// Lock-free running check
    #[inline]
    pub fn is_running(&self) -> bool {
        self.word.load(Ordering::Acquire) != FINISHED
    }

    /// Raw word snapshot, used by the queue to couple this state with
    /// its push cursor in one wide atomic
    #[inline]
    pub(crate) fn raw(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    /// Block until the job finishes
    ///
    /// Fast path: already finished, returns immediately. Otherwise a
    /// semaphore is checked out of `pool`, attached with a CAS, waited
    /// on, and returned to the pool. Whatever path the race takes, the
    /// checked-out semaphore always goes back to the pool before this
    /// returns.
    pub fn wait(&self, pool: &SemaphorePool) {
        if self.word.load(Ordering::Acquire) == FINISHED {
            return;
        }

        let handle = match pool.checkout() {
            Ok(h) => h,
            Err(_) => {
                // pool dry: degrade to spinning on the word
                while self.word.load(Ordering::Acquire) != FINISHED {
                    core::hint::spin_loop();
                }
                return;
            }
        };
        let encoded = encode_waiter(handle);

        loop {
            match self.word.compare_exchange(
                RUNNING,
                encoded,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // attached: set_stopped will release it
                    pool.get(handle).expect("own handle went stale").acquire();
                    pool.release(handle);
                    return;
                }
                Err(FINISHED) => {
                    // job finished between the fast path and the CAS
                    pool.release(handle);
                    return;
                }
                Err(observed) if observed != RUNNING => {
                    // another waiter got there first: piggyback on its
                    // semaphore, our own goes straight back
                    let other = decode_waiter(observed);
                    if let Some(sem) = pool.get(other) {
                        sem.acquire();
                    }
                    pool.release(handle);
                    return;
                }
                Err(_) => continue,
            }
        }
    }

    /// Mark the job finished, waking any attached waiters
    ///
    /// Idempotent: a second call on a finished variable is a no-op. The
    /// attached semaphore (if any) is released here and returned to the
    /// pool by the waiter that attached it.
    pub fn set_stopped(&self, pool: &SemaphorePool) {
        let mut observed = self.word.load(Ordering::Acquire);
        loop {
            if observed == FINISHED {
                return;
            }
            match self.word.compare_exchange(
                observed,
                FINISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => {
                    if prev > RUNNING {
                        let handle = decode_waiter(prev);
                        if let Some(sem) = pool.get(handle) {
                            sem.release();
                        }
                    }
                    return;
                }
                Err(now) => observed = now,
            }
        }
    }
}

impl Default for SyncVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fresh_var_not_running() {
        let pool = SemaphorePool::new(4);
        let var = SyncVar::new();
        assert!(!var.is_running());
        // wait on a never-started variable returns immediately
        var.wait(&pool);
    }

    #[test]
    fn test_run_stop_wait_returns_immediately() {
        let pool = SemaphorePool::new(4);
        let var = SyncVar::new();
        var.set_running();
        assert!(var.is_running());
        var.set_stopped(&pool);
        assert!(!var.is_running());
        var.wait(&pool);
        // no semaphore was ever consumed
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_set_stopped_idempotent() {
        let pool = SemaphorePool::new(4);
        let var = SyncVar::new();
        var.set_running();
        var.set_stopped(&pool);
        var.set_stopped(&pool);
        assert!(!var.is_running());
    }

    #[test]
    #[should_panic(expected = "set_running on a live sync variable")]
    fn test_double_set_running_panics() {
        let var = SyncVar::new();
        var.set_running();
        var.set_running();
    }

    #[test]
    fn test_wait_unblocks_on_stop() {
        let pool = Arc::new(SemaphorePool::new(4));
        let var = Arc::new(SyncVar::new());
        var.set_running();

        let (pool2, var2) = (Arc::clone(&pool), Arc::clone(&var));
        let waiter = thread::spawn(move || {
            var2.wait(&pool2);
        });

        thread::sleep(Duration::from_millis(20));
        var.set_stopped(&pool);
        waiter.join().unwrap();
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_two_waiters_no_lost_wakeup() {
        // many repetitions to hit the attach/piggyback/finish races
        for _ in 0..200 {
            let pool = Arc::new(SemaphorePool::new(8));
            let var = Arc::new(SyncVar::new());
            var.set_running();

            let mut waiters = vec![];
            for _ in 0..2 {
                let (pool2, var2) = (Arc::clone(&pool), Arc::clone(&var));
                waiters.push(thread::spawn(move || {
                    var2.wait(&pool2);
                }));
            }

            thread::yield_now();
            var.set_stopped(&pool);

            for w in waiters {
                w.join().unwrap();
            }
            assert!(!var.is_running());
            // every checked-out semaphore came back
            assert_eq!(pool.available(), 8);
        }
    }
}
