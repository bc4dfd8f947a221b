//! Bounded single-producer/single-consumer packet queue
//!
//! One producer thread streams parameter packets to one consumer worker
//! without per-packet locking. The queue's running/idle state and its
//! push cursor live in a single `AtomicU64` so a cursor publication and
//! the liveness check it depends on are one indivisible step - the
//! producer can never publish a slot the consumer has already stopped
//! looking for, and the consumer can never go idle while an unobserved
//! packet exists.
//!
//! Packed word layout:
//!
//! ```text
//! bits 63..32  queue run state, same encoding as SyncVar
//!              (0 idle, 1 running, even > 1 attached wait_finished waiter)
//! bit  31      producer-waiting mark (ring full, producer blocked)
//! bits 30..0   push cursor (slot index)
//! ```
//!
//! Exactly one thread may hold the producer role and one the consumer
//! role for the queue's lifetime. Two producers are undefined behavior;
//! this is a precondition, not something defended against at runtime.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::constants::MIN_QUEUE_CAPACITY;
use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::handle::{Invoker, JobHandle};
use crate::packet::{CacheMode, Completion, InfoBlock, QueuePacket};
use crate::semaphore::SemaphoreHandle;
use crate::state::JobState;
use crate::sync::{decode_waiter, encode_waiter, FINISHED as IDLE, RUNNING};
use crate::traits::QueueConsumer;
use crate::jm_error;

/// Producer-waiting mark on the push-cursor half
const WAIT_MARK: u32 = 1 << 31;

#[inline]
fn pack(state: u32, push: u32) -> u64 {
    ((state as u64) << 32) | push as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// One ring slot: packet payload plus the per-packet dispatch data
struct Slot<P> {
    params: MaybeUninit<P>,
    invoker: Option<Invoker>,
    invoker_idx: u32,
    state: Option<Arc<JobState>>,
    cache_mode: CacheMode,
    dedicated: bool,
}

impl<P> Slot<P> {
    fn empty() -> Self {
        Self {
            params: MaybeUninit::uninit(),
            invoker: None,
            invoker_idx: 0,
            state: None,
            cache_mode: CacheMode::K64,
            dedicated: false,
        }
    }
}

/// Bounded SPSC ring of job packets
///
/// Packets are delivered in strict FIFO order; a full ring blocks the
/// producer (via a pooled semaphore) rather than dropping or
/// overwriting unread data.
pub struct ProdConsQueue<P: Copy + Send + 'static> {
    /// Coupled (run state, push cursor) word - see module docs
    pos: AtomicU64,

    /// Pull cursor, owned by the consumer
    pull: AtomicU32,

    capacity: u32,
    ring: Box<[UnsafeCell<Slot<P>>]>,

    /// Raw handle of the producer's queue-full semaphore
    full_waiter: AtomicU32,

    /// Job identity used when a packet doesn't name its own
    default_handle: JobHandle,

    ctx: Arc<JobContext>,
    weak_self: Weak<Self>,
}

// Safety: the ring cells are only touched by the single producer (while
// a slot is unpublished) and the single consumer (after publication);
// the packed pos word orders the handoff.
unsafe impl<P: Copy + Send + 'static> Send for ProdConsQueue<P> {}
unsafe impl<P: Copy + Send + 'static> Sync for ProdConsQueue<P> {}

impl<P: Copy + Send + 'static> ProdConsQueue<P> {
    /// Create a queue of `capacity` slots bound to a default job
    ///
    /// The ring must hold more than two packets; smaller capacities are
    /// a configuration error.
    pub fn new(
        capacity: usize,
        handle: &JobHandle,
        ctx: Arc<JobContext>,
    ) -> JobResult<Arc<Self>> {
        if capacity < MIN_QUEUE_CAPACITY {
            return Err(JobError::SetupViolation);
        }
        if !handle.is_valid() {
            return Err(JobError::InvalidJobHandle);
        }

        let ring: Vec<UnsafeCell<Slot<P>>> =
            (0..capacity).map(|_| UnsafeCell::new(Slot::empty())).collect();

        Ok(Arc::new_cyclic(|weak| Self {
            pos: AtomicU64::new(pack(IDLE, 0)),
            pull: AtomicU32::new(0),
            capacity: capacity as u32,
            ring: ring.into_boxed_slice(),
            full_waiter: AtomicU32::new(SemaphoreHandle::NONE.raw()),
            default_handle: *handle,
            ctx,
            weak_self: weak.clone(),
        }))
    }

    /// Stream a packet for the queue's default job
    pub fn add_packet(&self, packet: QueuePacket<P>, cache_mode: CacheMode) {
        let handle = self.default_handle;
        self.add_packet_for(packet, cache_mode, &handle);
    }

    /// Stream a packet invoking a different registered job
    ///
    /// Each slot carries its own invoker, so one queue can interleave
    /// packets of distinct job types.
    pub fn add_packet_for(
        &self,
        packet: QueuePacket<P>,
        cache_mode: CacheMode,
        handle: &JobHandle,
    ) {
        // Ring full? The push cursor must never advance onto the pull
        // cursor while the consumer is live - cursor equality is the
        // empty state. Block before that happens. A single check
        // suffices: if the mark CAS fails (or the wakeup turns out to
        // be the consumer finishing rather than freeing a slot),
        // writing the push slot is safe either way and the publish step
        // below sorts out who dispatches.
        let snapshot = self.pos.load(Ordering::Acquire);
        let (state_w, push_m) = unpack(snapshot);
        let push = push_m & !WAIT_MARK;
        let next_push = (push + 1) % self.capacity;
        if state_w != IDLE && next_push == self.pull.load(Ordering::Acquire) {
            self.wait_for_slot(snapshot, state_w, push);
        }

        // Per-packet completion state goes running before publication
        if let Some(ref state) = packet.state {
            state.set_running();
            state.stamp_dispatch(self.ctx.now_ns());
        }
        let dedicated = packet.dedicated_thread_only;

        // Fill the push slot. The producer owns it: it is either
        // unpublished or already consumed.
        let slot = unsafe { &mut *self.ring[push as usize].get() };
        *slot = Slot {
            params: MaybeUninit::new(packet.params),
            invoker: Some(handle.invoker()),
            invoker_idx: handle.invoker_idx(),
            state: packet.state,
            cache_mode,
            dedicated: packet.dedicated_thread_only,
        };

        // Publish: advance the cursor only if the consumer is still
        // live; otherwise take over and start a fresh dispatch.
        loop {
            let snapshot = self.pos.load(Ordering::Acquire);
            let (state_w, _) = unpack(snapshot);

            if state_w == IDLE {
                // no consumer - publish and dispatch ourselves
                self.pos.store(pack(RUNNING, next_push), Ordering::Release);
                self.dispatch(handle, cache_mode, dedicated);
                return;
            }

            // consumer is live: couple the liveness check and the
            // cursor advance into one CAS
            if self
                .pos
                .compare_exchange(
                    snapshot,
                    pack(state_w, next_push),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
            // state flipped under us (consumer finished, or a waiter
            // attached); re-evaluate
        }
    }

    /// Block until the ring has a writable slot at `push`
    fn wait_for_slot(&self, snapshot: u64, state_w: u32, push: u32) {
        let handle = match self.ctx.semaphores.checkout() {
            Ok(h) => h,
            Err(_) => {
                // pool dry: spin until the consumer moves
                loop {
                    let (s, p) = unpack(self.pos.load(Ordering::Acquire));
                    let next = ((p & !WAIT_MARK) + 1) % self.capacity;
                    if s == IDLE || next != self.pull.load(Ordering::Acquire) {
                        return;
                    }
                    core::hint::spin_loop();
                }
            }
        };

        self.full_waiter.store(handle.raw(), Ordering::Release);
        let marked = pack(state_w, push | WAIT_MARK);
        if self
            .pos
            .compare_exchange(snapshot, marked, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // consumer will clear the mark and release us
            self.ctx
                .semaphores
                .get(handle)
                .expect("own handle went stale")
                .acquire();
        } else {
            // consumer finished or advanced in the interim
            self.full_waiter
                .store(SemaphoreHandle::NONE.raw(), Ordering::Release);
        }
        // the checked-out semaphore goes back on every path
        self.ctx.semaphores.release(handle);
    }

    /// Hand the queue to the backend as a fresh consumer job
    fn dispatch(&self, handle: &JobHandle, cache_mode: CacheMode, dedicated: bool) {
        let queue: Arc<dyn QueueConsumer> = match self.weak_self.upgrade() {
            Some(arc) => arc,
            None => return, // queue is being dropped
        };

        let mut block = InfoBlock::new(handle);
        block.set_cache_mode(cache_mode);
        block.set_completion(Completion::Queue(queue));
        block.set_dedicated_thread_only(dedicated);

        let res = self
            .ctx
            .backend()
            .and_then(|backend| backend.add_job(block));
        if let Err(err) = res {
            jm_error!("queue dispatch for '{}' failed: {}", handle.name(), err);
        }
    }

    /// Block until the consumer has drained every published packet
    pub fn wait_finished(&self) {
        loop {
            let snapshot = self.pos.load(Ordering::Acquire);
            let (state_w, push) = unpack(snapshot);

            if state_w == IDLE {
                return;
            }

            if state_w == RUNNING {
                let handle = match self.ctx.semaphores.checkout() {
                    Ok(h) => h,
                    Err(_) => {
                        while unpack(self.pos.load(Ordering::Acquire)).0 != IDLE {
                            core::hint::spin_loop();
                        }
                        return;
                    }
                };
                if self
                    .pos
                    .compare_exchange(
                        snapshot,
                        pack(encode_waiter(handle), push),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.ctx
                        .semaphores
                        .get(handle)
                        .expect("own handle went stale")
                        .acquire();
                    self.ctx.semaphores.release(handle);
                    return;
                }
                // cursor moved or state changed; retry with a fresh view
                self.ctx.semaphores.release(handle);
                continue;
            }

            // another waiter already attached: piggyback
            if let Some(sem) = self.ctx.semaphores.get(decode_waiter(state_w)) {
                sem.acquire();
            }
            return;
        }
    }

    /// True iff the push cursor equals the pull cursor
    pub fn is_empty(&self) -> bool {
        let (_, push_m) = unpack(self.pos.load(Ordering::Acquire));
        (push_m & !WAIT_MARK) == self.pull.load(Ordering::Acquire)
    }

    /// Pushed-but-undrained packet count (lock-free snapshot)
    ///
    /// Cursor equality is the empty state; the producer blocks before a
    /// full lap could make it ambiguous.
    pub fn pending_packets(&self) -> u32 {
        let (_, push_m) = unpack(self.pos.load(Ordering::Acquire));
        let push = push_m & !WAIT_MARK;
        let pull = self.pull.load(Ordering::Acquire);
        if push > pull {
            push - pull
        } else if push < pull {
            self.capacity - pull + push
        } else {
            0
        }
    }

    /// Ring capacity in packets
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Clear a producer-waiting mark and wake the blocked producer
    fn clear_mark_and_wake(&self, ctx: &JobContext) {
        loop {
            let snapshot = self.pos.load(Ordering::Acquire);
            let (state_w, push_m) = unpack(snapshot);
            if push_m & WAIT_MARK == 0 {
                return;
            }
            if self
                .pos
                .compare_exchange(
                    snapshot,
                    pack(state_w, push_m & !WAIT_MARK),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                let raw = self
                    .full_waiter
                    .swap(SemaphoreHandle::NONE.raw(), Ordering::AcqRel);
                let handle = SemaphoreHandle::from_raw(raw);
                if !handle.is_none() {
                    if let Some(sem) = ctx.semaphores.get(handle) {
                        sem.release();
                    }
                }
                return;
            }
        }
    }
}

impl<P: Copy + Send + 'static> QueueConsumer for ProdConsQueue<P> {
    fn consume(&self, ctx: &JobContext, _worker_id: u32) {
        loop {
            let snapshot = self.pos.load(Ordering::Acquire);
            let (state_w, push_m) = unpack(snapshot);
            let push = push_m & !WAIT_MARK;
            let pull = self.pull.load(Ordering::Relaxed);

            if pull != push {
                // copy the packet out, then free the slot before the
                // body runs so the producer regains it immediately; the
                // slot borrow ends before the cursor moves
                let (invoker, params, state) = {
                    let slot = unsafe { &mut *self.ring[pull as usize].get() };
                    let invoker = slot.invoker.take().expect("consuming an empty slot");
                    // Safety: the slot was published by the producer
                    let params = unsafe { slot.params.assume_init() };
                    (invoker, params, slot.state.take())
                };

                self.pull
                    .store((pull + 1) % self.capacity, Ordering::Release);
                self.clear_mark_and_wake(ctx);

                // Safety: params were written by the matching typed
                // producer path
                unsafe { invoker(&params as *const P as *const u8) };

                if let Some(state) = state {
                    state.stamp_end(ctx.now_ns());
                    state.set_stopped(&ctx.semaphores);
                }
                continue;
            }

            // drained - a blocked producer must be woken before the
            // queue can go idle, or its wakeup would be lost
            if push_m & WAIT_MARK != 0 {
                self.clear_mark_and_wake(ctx);
                continue;
            }

            // go idle only if the cursor pair is still drained; the CAS
            // fails if the producer published another packet meanwhile
            match self.pos.compare_exchange(
                snapshot,
                pack(IDLE, push),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if state_w > RUNNING {
                        // wake wait_finished callers
                        if let Some(sem) = ctx.semaphores.get(decode_waiter(state_w)) {
                            sem.release();
                        }
                    }
                    return;
                }
                Err(_) => continue,
            }
        }
    }
}
