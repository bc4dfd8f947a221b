//! Pooled blocking wait primitive
//!
//! A `JobSemaphore` is a condition-variable latch used for yield-waiting
//! in the corner cases of the dispatch core: waiting for a job to finish
//! and waiting for a full queue to free a slot. Semaphores are never
//! owned long-term; a waiter checks one out of the `SemaphorePool`,
//! blocks on it, and returns it immediately after use.
//!
//! Pool handles are generation-tagged indices so that a handle held
//! across a release/recycle cycle can be detected as stale instead of
//! blocking on somebody else's wait.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{JobError, JobResult};
use crate::spinlock::SpinLock;

/// Blocking latch with "running" / "finished" states
///
/// All threads blocked in `acquire` wake together on a single `release`.
pub struct JobSemaphore {
    finished: Mutex<bool>,
    cond: Condvar,
}

impl JobSemaphore {
    pub fn new() -> Self {
        Self {
            finished: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Arm the latch; subsequent `acquire` calls block until `release`
    pub fn set_running(&self) {
        let mut finished = self.finished.lock().unwrap();
        *finished = false;
    }

    /// Block until the latch is released
    pub fn acquire(&self) {
        let mut finished = self.finished.lock().unwrap();
        while !*finished {
            finished = self.cond.wait(finished).unwrap();
        }
    }

    /// Block until released or the timeout elapses; true if released
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut finished = self.finished.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*finished {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(finished, deadline - now).unwrap();
            finished = guard;
        }
        true
    }

    /// Release the latch, waking every blocked acquirer
    pub fn release(&self) {
        let mut finished = self.finished.lock().unwrap();
        *finished = true;
        self.cond.notify_all();
    }
}

impl Default for JobSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Generation-tagged pool handle
///
/// Layout: low 16 bits index, next 14 bits generation. The raw value
/// stays below 2^30 so the sync-word encoding (`(raw + 1) << 1`) always
/// fits one 32-bit atomic word. Generations wrap at 2^14; a handle would
/// have to survive 16384 recycles of the same slot to alias, and a
/// handle only lives for the duration of one blocked wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SemaphoreHandle(u32);

impl SemaphoreHandle {
    /// Sentinel for "no semaphore"
    pub const NONE: SemaphoreHandle = SemaphoreHandle(u32::MAX);

    const IDX_BITS: u32 = 16;
    const IDX_MASK: u32 = (1 << Self::IDX_BITS) - 1;
    const GEN_MASK: u16 = (1 << 14) - 1;

    #[inline]
    fn new(idx: u16, generation: u16) -> Self {
        SemaphoreHandle((((generation & Self::GEN_MASK) as u32) << Self::IDX_BITS) | idx as u32)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        SemaphoreHandle(raw)
    }

    #[inline]
    fn idx(self) -> usize {
        (self.0 & Self::IDX_MASK) as usize
    }

    #[inline]
    fn generation(self) -> u16 {
        (self.0 >> Self::IDX_BITS) as u16 & Self::GEN_MASK
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

struct PoolSlot {
    semaphore: JobSemaphore,
    // bumped on every release back to the pool
    generation: SpinLock<u16>,
}

/// Fixed pool of reusable wait semaphores
///
/// Checkout prefers recently returned slots (LIFO) for cache-friendly
/// reuse, the same way the scheduler recycles its other fixed slots.
pub struct SemaphorePool {
    slots: Box<[PoolSlot]>,
    free_stack: SpinLock<Vec<u16>>,
}

impl SemaphorePool {
    /// Create a pool with `capacity` semaphores (capacity <= 2^16)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= (1 << 16), "pool capacity out of range");

        let slots: Vec<PoolSlot> = (0..capacity)
            .map(|_| PoolSlot {
                semaphore: JobSemaphore::new(),
                generation: SpinLock::new(0),
            })
            .collect();

        // all slots start free, lowest index on top
        let free_stack: Vec<u16> = (0..capacity as u16).rev().collect();

        Self {
            slots: slots.into_boxed_slice(),
            free_stack: SpinLock::new(free_stack),
        }
    }

    /// Check a semaphore out of the pool, armed for waiting
    pub fn checkout(&self) -> JobResult<SemaphoreHandle> {
        let idx = {
            let mut free = self.free_stack.lock();
            free.pop().ok_or(JobError::NoSemaphoreAvailable)?
        };

        let slot = &self.slots[idx as usize];
        slot.semaphore.set_running();
        let generation = *slot.generation.lock();
        Ok(SemaphoreHandle::new(idx, generation))
    }

    /// Return a semaphore to the pool
    ///
    /// The slot's generation is bumped so outstanding handles go stale.
    pub fn release(&self, handle: SemaphoreHandle) {
        if handle.is_none() {
            return;
        }
        let slot = &self.slots[handle.idx()];
        {
            let mut generation = slot.generation.lock();
            *generation = generation.wrapping_add(1);
        }
        self.free_stack.lock().push(handle.idx() as u16);
    }

    /// Resolve a handle to its semaphore, `None` if the handle is stale
    ///
    /// A stale handle means the checkout this handle refers to was
    /// already returned - for a waiter that is equivalent to "already
    /// released".
    pub fn get(&self, handle: SemaphoreHandle) -> Option<&JobSemaphore> {
        if handle.is_none() || handle.idx() >= self.slots.len() {
            return None;
        }
        let slot = &self.slots[handle.idx()];
        if *slot.generation.lock() & SemaphoreHandle::GEN_MASK != handle.generation() {
            return None;
        }
        Some(&slot.semaphore)
    }

    /// Number of semaphores currently available
    pub fn available(&self) -> usize {
        self.free_stack.lock().len()
    }

    /// Total pool capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
