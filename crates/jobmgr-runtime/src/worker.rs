//! Worker threads
//!
//! Each worker owns a high-priority and a normal lane. The pop order is
//! own-high, own-normal, then stealing from other general workers;
//! dedicated workers never steal and never have their lanes stolen
//! from, which is what pins dedicated-only jobs to them.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use jobmgr_core::constants::WORKER_NONE;
use jobmgr_core::packet::{Completion, InfoBlock};
use jobmgr_core::{jm_debug, jm_warn};

use crate::backend::BackendShared;
use crate::fiber::{create_fiber, destroy_fiber};
use crate::time::now_ns;

/// Per-worker dispatch lanes
pub(crate) struct WorkerLanes {
    pub high: ArrayQueue<InfoBlock>,
    pub normal: ArrayQueue<InfoBlock>,
}

impl WorkerLanes {
    pub fn new(depth: usize) -> Self {
        Self {
            high: ArrayQueue::new(depth),
            normal: ArrayQueue::new(depth),
        }
    }

    /// Route a block to the lane its priority selects
    pub fn push(&self, block: InfoBlock) -> Result<(), InfoBlock> {
        if block.is_high_priority() {
            self.high.push(block)
        } else {
            self.normal.push(block)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }
}

thread_local! {
    static WORKER_ID: std::cell::Cell<u32> = const { std::cell::Cell::new(WORKER_NONE) };
}

/// Worker index of the current thread, `WORKER_NONE` outside the pool
#[inline]
pub fn worker_thread_id() -> u32 {
    WORKER_ID.with(|cell| cell.get())
}

fn set_worker_id(id: u32) {
    WORKER_ID.with(|cell| cell.set(id));
}

/// Main loop of one worker thread
pub(crate) fn worker_main(worker_id: usize, shared: Arc<BackendShared>) {
    set_worker_id(worker_id as u32);
    jm_debug!("worker {} up", worker_id);

    loop {
        if let Some(block) = pop_block(&shared, worker_id) {
            execute_block(&shared, worker_id as u32, block);
            continue;
        }
        if shared.shutdown_requested() {
            break;
        }
        shared.parking.park(Some(shared.config.park_interval));
    }

    jm_debug!("worker {} down", worker_id);
}

/// Find the next block for this worker
fn pop_block(shared: &BackendShared, worker_id: usize) -> Option<InfoBlock> {
    let own = &shared.lanes[worker_id];
    if let Some(block) = own.high.pop() {
        return Some(block);
    }
    if let Some(block) = own.normal.pop() {
        return Some(block);
    }

    // dedicated workers run only what was pinned to them
    if shared.is_dedicated(worker_id) {
        return None;
    }

    // steal from the other general workers
    let general = shared.num_general_workers();
    for offset in 1..general {
        let victim = &shared.lanes[(worker_id + offset) % general];
        if let Some(block) = victim.high.pop() {
            return Some(block);
        }
        if let Some(block) = victim.normal.pop() {
            return Some(block);
        }
    }
    None
}

/// Run one dispatch package to completion
fn execute_block(shared: &BackendShared, worker_id: u32, mut block: InfoBlock) {
    let ctx = shared.ctx();

    match block.take_completion() {
        Completion::Queue(queue) => {
            // this worker becomes the queue's consumer until it drains
            run_body(shared, || queue.consume(ctx, worker_id));
        }
        Completion::State(state) => {
            state.stamp_start(now_ns(), worker_id);
            run_body(shared, || {
                // Safety: params were written by the typed dispatch path
                unsafe { (block.invoker())(block.params_ptr()) };
            });
            if let Some((func, arg)) = block.callback() {
                func(arg);
            }
            state.stamp_end(now_ns());
            state.set_stopped(&ctx.semaphores);
        }
        Completion::None => {
            run_body(shared, || {
                // Safety: params were written by the typed dispatch path
                unsafe { (block.invoker())(block.params_ptr()) };
            });
            if let Some((func, arg)) = block.callback() {
                func(arg);
            }
        }
    }

    shared.job_done();
}

extern "C" fn run_frame(arg: usize) {
    // Safety: arg points at the worker's stack frame, alive while the
    // worker blocks in join
    let body = unsafe { &mut *(arg as *mut &mut dyn FnMut()) };
    (**body)();
}

/// Execute a job body, optionally layered onto a cooperative fiber
fn run_body(shared: &BackendShared, mut body: impl FnMut()) {
    if shared.config.run_jobs_on_fibers {
        let mut body_ref: &mut dyn FnMut() = &mut body;
        let frame = &mut body_ref as *mut &mut dyn FnMut() as usize;
        match create_fiber(run_frame, frame, shared.config.fiber_stack_size) {
            Ok(fiber) => {
                fiber.join();
                destroy_fiber(fiber);
                return;
            }
            Err(err) => {
                jm_warn!("fiber creation failed ({}), running job inline", err);
            }
        }
    }
    body();
}
