//! Cooperative fibers
//!
//! A fiber is an execution context with its own stack that a thread
//! switches into and out of explicitly. Only one of {calling thread,
//! fiber} executes at a time; there is no parallelism within the pair,
//! only suspension-point interleaving.
//!
//! The task header and the stack are one mapping (`stack::FiberRegion`)
//! and are released together. A magic value at the header base detects
//! use of a context that was never prepared, and every switch is
//! timestamped into a fixed ring for post-mortem inspection.

use core::cell::Cell;
use core::ptr::NonNull;

use jobmgr_core::constants::FIBER_SWITCH_RECORDS;
use jobmgr_core::error::{JobError, JobResult};
use jobmgr_core::jm_warn;

use crate::arch::SavedRegs;
use crate::current_arch::{context_switch, init_context};
use crate::stack::FiberRegion;
use crate::time::now_ns;

/// Entry function of a fiber; the argument is a pointer-sized token
pub type FiberFn = extern "C" fn(usize);

/// Header magic; a context without it was never prepared
const FIBER_MAGIC: u64 = 0x464a_4d31_5446_4253; // "FJM1TFBS"

/// State flags of a fiber task
pub mod fiber_flags {
    /// Entry function has been entered at least once
    pub const STARTED: u32 = 0x1;
    /// A join drove this fiber to completion
    pub const JOINED: u32 = 0x2;
    /// Entry function returned; context is dead
    pub const FINALIZED: u32 = 0x4;
    /// Fiber yielded and is waiting to be resumed
    pub const SUSPENDED: u32 = 0x8;
}

/// Task header at the base of the fiber's mapping
#[repr(C, align(64))]
struct FiberHeader {
    /// Must read `FIBER_MAGIC` before any switch
    magic: u64,

    /// `fiber_flags` bits
    flags: u32,

    /// Total switches recorded (ring index = count % capacity)
    switch_count: u32,

    /// Timestamp ring of recent switches, oldest overwritten first
    switch_times: [u64; FIBER_SWITCH_RECORDS],

    /// Accumulated ns suspended while the caller ran
    time_yielded: u64,

    /// Accumulated ns executing inside the fiber
    time_in_fiber: u64,

    /// Number of yields performed by the fiber
    fiber_yields: u64,

    /// Timestamp of the most recent switch in either direction
    last_switch_ns: u64,

    /// Saved state of the fiber side
    fiber_regs: SavedRegs,

    /// Saved state of the thread that switched in
    caller_regs: SavedRegs,

    /// Region bookkeeping for the combined unmap
    region_base: *mut u8,
    region_len: usize,
}

thread_local! {
    /// Fiber currently executing on this thread, null outside any fiber
    static CURRENT_FIBER: Cell<*mut FiberHeader> = const { Cell::new(core::ptr::null_mut()) };
}

/// Owning handle to a fiber task
///
/// Not `Send`: a fiber belongs to the thread that drives it. Dropping a
/// handle releases the header and stack together, provided the fiber is
/// finalized or was never started; a live fiber's region is leaked with
/// a warning rather than pulled out from under its stack.
pub struct FiberTask {
    header: NonNull<FiberHeader>,
}

/// Create a fiber and run it until its first yield or completion
///
/// The entry function starts executing before this returns; a fiber
/// that never yields comes back already finalized.
pub fn create_fiber(entry: FiberFn, arg: usize, stack_size: usize) -> JobResult<FiberTask> {
    if stack_size < crate::stack::PAGE_SIZE {
        return Err(JobError::SetupViolation);
    }

    let region = FiberRegion::map(core::mem::size_of::<FiberHeader>(), stack_size)?;
    let header_ptr = region.header_ptr() as *mut FiberHeader;

    // Safety: the region is freshly mapped and exclusively ours
    unsafe {
        header_ptr.write(FiberHeader {
            magic: FIBER_MAGIC,
            flags: 0,
            switch_count: 0,
            switch_times: [0; FIBER_SWITCH_RECORDS],
            time_yielded: 0,
            time_in_fiber: 0,
            fiber_yields: 0,
            last_switch_ns: 0,
            fiber_regs: SavedRegs::default(),
            caller_regs: SavedRegs::default(),
            region_base: region.header_ptr(),
            region_len: region.len(),
        });
        init_context(
            &mut (*header_ptr).fiber_regs,
            region.stack_top(),
            entry as usize,
            arg,
        );
    }

    let task = FiberTask {
        // Safety: mapping succeeded, pointer is non-null
        header: unsafe { NonNull::new_unchecked(header_ptr) },
    };

    // creation implies the first resume happens synchronously
    task.switch_to();
    Ok(task)
}

impl FiberTask {
    #[inline]
    fn header(&self) -> &FiberHeader {
        // Safety: header lives as long as the task
        unsafe { self.header.as_ref() }
    }

    // Safety: single-threaded cooperative contract - callers hold the
    // only execution path touching this header.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn header_mut(&self) -> &mut FiberHeader {
        unsafe { &mut *self.header.as_ptr() }
    }

    /// Suspend the calling context and transfer control into the fiber
    ///
    /// Returns when the fiber yields or finalizes. Switching into a
    /// finalized or unprepared context is a programming error.
    pub fn switch_to(&self) {
        let header = unsafe { self.header_mut() };
        assert_eq!(header.magic, FIBER_MAGIC, "switching an unprepared fiber context");
        assert_eq!(
            header.flags & fiber_flags::FINALIZED,
            0,
            "switching a finalized fiber"
        );
        assert!(
            !is_in_fiber_thread(),
            "nested fiber switch from inside a fiber"
        );

        let now = now_ns();
        if header.flags & fiber_flags::STARTED != 0 {
            header.time_yielded += now - header.last_switch_ns;
        }
        record_switch(header, now);
        header.last_switch_ns = now;
        header.flags |= fiber_flags::STARTED;
        header.flags &= !fiber_flags::SUSPENDED;

        CURRENT_FIBER.with(|cell| cell.set(self.header.as_ptr()));
        // Safety: both register areas live in the pinned header
        unsafe {
            context_switch(&mut header.caller_regs, &header.fiber_regs);
        }
        CURRENT_FIBER.with(|cell| cell.set(core::ptr::null_mut()));
    }

    /// Resume the fiber until it finalizes
    ///
    /// Blocks the calling thread cooperatively (switch loop, no OS
    /// blocking). A fiber that completes without yielding is already
    /// finalized after creation, so joining it returns immediately.
    pub fn join(&self) {
        while !self.is_finalized() {
            self.switch_to();
        }
        let header = unsafe { self.header_mut() };
        header.flags |= fiber_flags::JOINED;
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.header().flags & fiber_flags::STARTED != 0
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.header().flags & fiber_flags::SUSPENDED != 0
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.header().flags & fiber_flags::FINALIZED != 0
    }

    /// Accumulated nanoseconds executing inside the fiber
    pub fn time_in_fiber(&self) -> u64 {
        self.header().time_in_fiber
    }

    /// Accumulated nanoseconds suspended while the caller ran
    pub fn time_yielded(&self) -> u64 {
        self.header().time_yielded
    }

    /// Number of yields the fiber performed
    pub fn yields(&self) -> u64 {
        self.header().fiber_yields
    }

    /// Total switches recorded (may exceed the ring capacity)
    pub fn switch_count(&self) -> u32 {
        self.header().switch_count
    }

    /// Recent switch timestamps, oldest first, at most the ring capacity
    pub fn switch_history(&self) -> Vec<u64> {
        let header = self.header();
        let count = header.switch_count as usize;
        let cap = FIBER_SWITCH_RECORDS;
        if count <= cap {
            header.switch_times[..count].to_vec()
        } else {
            let start = count % cap;
            let mut out = Vec::with_capacity(cap);
            out.extend_from_slice(&header.switch_times[start..]);
            out.extend_from_slice(&header.switch_times[..start]);
            out
        }
    }
}

impl Drop for FiberTask {
    fn drop(&mut self) {
        let header = self.header();
        let destroyable =
            header.flags & fiber_flags::FINALIZED != 0 || header.flags & fiber_flags::STARTED == 0;
        if !destroyable {
            // a suspended fiber still owns live stack frames
            jm_warn!("leaking fiber region: task dropped while suspended");
            return;
        }
        let (base, len) = (header.region_base, header.region_len);
        // Safety: fiber is dead (or never ran); no references remain
        unsafe { FiberRegion::unmap(base, len) };
    }
}

/// Destroy a fiber, releasing header and stack together
///
/// Precondition: the task is finalized or was never started.
pub fn destroy_fiber(task: FiberTask) {
    assert!(
        task.is_finalized() || !task.is_started(),
        "destroying a fiber that is still suspended"
    );
    drop(task);
}

/// Yield from inside a fiber back to whichever context switched in
///
/// Callable only from fiber code; outside a fiber this is a programming
/// error.
pub fn yield_fiber() {
    let ptr = CURRENT_FIBER.with(|cell| cell.get());
    assert!(!ptr.is_null(), "yield_fiber called outside a fiber");

    // Safety: we are executing inside this fiber, the header is pinned
    let header = unsafe { &mut *ptr };
    debug_assert_eq!(header.magic, FIBER_MAGIC);

    let now = now_ns();
    header.time_in_fiber += now - header.last_switch_ns;
    record_switch(header, now);
    header.last_switch_ns = now;
    header.fiber_yields += 1;
    header.flags |= fiber_flags::SUSPENDED;

    unsafe {
        context_switch(&mut header.fiber_regs, &header.caller_regs);
    }
}

/// True when the current thread is executing inside a fiber
#[inline]
pub fn is_in_fiber_thread() -> bool {
    CURRENT_FIBER.with(|cell| !cell.get().is_null())
}

/// Time spent in the "other stack" of the current fiber pair
///
/// Inside a fiber this returns the cycles accumulated while yielded
/// (useful to subtract suspension time from a measurement); outside any
/// fiber it returns 0.
pub fn fiber_yield_time() -> u64 {
    let ptr = CURRENT_FIBER.with(|cell| cell.get());
    if ptr.is_null() {
        return 0;
    }
    unsafe { (*ptr).time_yielded }
}

/// Record a switch timestamp in the fixed ring
fn record_switch(header: &mut FiberHeader, now: u64) {
    let idx = header.switch_count as usize % FIBER_SWITCH_RECORDS;
    header.switch_times[idx] = now;
    header.switch_count = header.switch_count.wrapping_add(1);
}

/// Entry-return hook: marks the fiber finalized and leaves it for good
///
/// Reached from the arch trampoline when the entry function returns.
/// Never returns to the trampoline.
pub(crate) extern "C" fn fiber_finished() {
    let ptr = CURRENT_FIBER.with(|cell| cell.get());
    debug_assert!(!ptr.is_null(), "fiber finished outside a fiber");

    // Safety: we are the fiber; the header outlives this switch
    let header = unsafe { &mut *ptr };
    let now = now_ns();
    header.time_in_fiber += now - header.last_switch_ns;
    record_switch(header, now);
    header.last_switch_ns = now;
    header.flags |= fiber_flags::FINALIZED;
    header.flags &= !fiber_flags::SUSPENDED;

    unsafe {
        context_switch(&mut header.fiber_regs, &header.caller_regs);
    }
    unreachable!("finalized fiber was resumed");
}

#[cfg(test)]
#[cfg(target_arch = "x86_64")]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    // each test asserts on its own static: tests run concurrently
    static COMPLETED_ARG: AtomicUsize = AtomicUsize::new(0);
    static YIELD_STEPS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_entry(arg: usize) {
        COMPLETED_ARG.store(arg, Ordering::SeqCst);
    }

    extern "C" fn step_entry(rounds: usize) {
        for _ in 0..rounds {
            YIELD_STEPS.fetch_add(1, Ordering::SeqCst);
            yield_fiber();
        }
    }

    extern "C" fn silent_yield_entry(rounds: usize) {
        for _ in 0..rounds {
            yield_fiber();
        }
    }

    #[test]
    fn test_run_to_completion_without_yield() {
        let fiber = create_fiber(count_entry, 41, 32 * 1024).unwrap();
        // entry ran synchronously during creation
        assert_eq!(COMPLETED_ARG.load(Ordering::SeqCst), 41);
        assert!(fiber.is_finalized());

        // join of an already-complete fiber returns after zero resumes
        let switches = fiber.switch_count();
        fiber.join();
        assert_eq!(fiber.switch_count(), switches);
        destroy_fiber(fiber);
    }

    #[test]
    fn test_yield_and_resume() {
        let fiber = create_fiber(step_entry, 3, 32 * 1024).unwrap();
        assert!(fiber.is_suspended());
        assert_eq!(YIELD_STEPS.load(Ordering::SeqCst), 1);

        fiber.switch_to();
        assert_eq!(YIELD_STEPS.load(Ordering::SeqCst), 2);

        fiber.join();
        assert_eq!(YIELD_STEPS.load(Ordering::SeqCst), 3);
        assert!(fiber.is_finalized());
        assert_eq!(fiber.yields(), 3);
        destroy_fiber(fiber);
    }

    #[test]
    fn test_time_counters_accumulate() {
        let fiber = create_fiber(silent_yield_entry, 4, 32 * 1024).unwrap();
        let mut last_total = 0u64;
        while !fiber.is_finalized() {
            let total = fiber.time_in_fiber() + fiber.time_yielded();
            assert!(total >= last_total);
            last_total = total;
            fiber.switch_to();
        }
        assert!(fiber.time_in_fiber() + fiber.time_yielded() >= last_total);
        destroy_fiber(fiber);
    }

    #[test]
    fn test_switch_history_ring_bounded() {
        // 40 yields produce well over the ring capacity of switches
        let fiber = create_fiber(silent_yield_entry, 40, 32 * 1024).unwrap();
        fiber.join();

        let history = fiber.switch_history();
        assert_eq!(history.len(), FIBER_SWITCH_RECORDS);
        // oldest-first: timestamps are non-decreasing across the ring
        for pair in history.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(fiber.switch_count() as usize > FIBER_SWITCH_RECORDS);
        destroy_fiber(fiber);
    }

    #[test]
    fn test_not_in_fiber_on_thread() {
        assert!(!is_in_fiber_thread());
        assert_eq!(fiber_yield_time(), 0);
    }

    extern "C" fn probe_entry(_arg: usize) {
        assert!(is_in_fiber_thread());
        yield_fiber();
    }

    #[test]
    fn test_in_fiber_thread_inside_entry() {
        let fiber = create_fiber(probe_entry, 0, 32 * 1024).unwrap();
        assert!(!is_in_fiber_thread());
        fiber.join();
        destroy_fiber(fiber);
    }
}
