//! # jobmgr - job dispatch and cooperative scheduling
//!
//! Parallelizes short-lived units of work across a fixed worker pool,
//! with a single-producer/single-consumer streaming path for chained
//! work and cooperative fibers for suspending a job without blocking an
//! OS thread.
//!
//! ## Quick Start
//!
//! ```ignore
//! use jobmgr::{JobManager, BackendConfig, CacheMode, JobState, job_invoker};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Copy)]
//! struct Blur { radius: u32 }
//!
//! fn blur_job(params: &Blur) { /* ... */ }
//! job_invoker!(blur_invoker, Blur, blur_job);
//!
//! fn main() {
//!     let manager = JobManager::new(BackendConfig::default()).unwrap();
//!     manager.init().unwrap();
//!
//!     let handle = manager.get_job_handle("blur", blur_invoker);
//!     let state = Arc::new(JobState::new());
//!
//!     manager
//!         .dispatcher()
//!         .params(&Blur { radius: 4 })
//!         .job_state(&state)
//!         .run(CacheMode::K64, &handle)
//!         .unwrap();
//!
//!     manager.wait_for_job(&state, -1);
//!     manager.shut_down().unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller ── JobDispatcher ──┐                ┌── worker 0 (hi | normal)
//!                           ├── ThreadBackend ┼── worker 1 (hi | normal)
//! producer ─ ProdConsQueue ─┘                └── worker N (dedicated)
//!                                                  │
//!                                            fiber per job (optional)
//! ```

// Re-export core types
pub use jobmgr_core::{
    constants, Backend, BackendState, CacheMode, Completion, InfoBlock, Invoker, JobContext,
    JobDispatcher, JobError, JobHandle, JobProfile, JobRegistry, JobResult, JobSemaphore,
    JobState, PagingMode, ProdConsQueue, QueueConsumer, QueuePacket, SemaphoreHandle,
    SemaphorePool, SyncVar,
};
pub use jobmgr_core::packet::{flags, op_mode, CallbackFn};

// Re-export logging macros
pub use jobmgr_core::{jm_debug, jm_error, jm_info, jm_trace, jm_warn};
pub use jobmgr_core::jlog::{self, LogLevel};

// Re-export runtime types
pub use jobmgr_runtime::{
    create_fiber, fiber_yield_time, is_in_fiber_thread, now_ns, worker_thread_id, yield_fiber,
    BackendConfig, FiberFn, FiberTask, ThreadBackend,
};
pub use jobmgr_runtime::fiber::destroy_fiber;

use std::sync::Arc;

/// Define an invoker function for a typed job body
///
/// Expands to the `unsafe fn(*const u8)` glue that recovers the typed
/// parameter struct and calls the body.
#[macro_export]
macro_rules! job_invoker {
    ($name:ident, $params:ty, $body:path) => {
        unsafe fn $name(raw: *const u8) {
            // Safety: the dispatch path wrote a `$params` value here
            let params = unsafe { &*(raw as *const $params) };
            $body(params);
        }
    };
}

/// Owning front end over context + backend
///
/// Creates the scheduler context and the thread-pool backend together,
/// wires them, and tears both down on `shut_down`.
pub struct JobManager {
    ctx: Arc<JobContext>,
    backend: Arc<ThreadBackend>,
}

impl JobManager {
    /// Create a manager; workers start at `init`
    pub fn new(config: BackendConfig) -> JobResult<Self> {
        let ctx = JobContext::with_pool_size(config.semaphore_pool_size);
        let backend = ThreadBackend::new(config)?;
        ctx.set_backend(backend.clone())?;
        Ok(Self { ctx, backend })
    }

    /// Bring up the worker pool; call exactly once
    pub fn init(&self) -> JobResult<()> {
        self.backend.init(&self.ctx)
    }

    /// The shared scheduler context
    pub fn ctx(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Obtain a job handle from the name registry
    ///
    /// Safe from any thread, before or after `init`; handle identity is
    /// stable for the process lifetime.
    pub fn get_job_handle(&self, name: &str, invoker: Invoker) -> JobHandle {
        self.ctx.registry.get_job_handle(name, invoker)
    }

    /// Start building a dispatch
    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(Arc::clone(&self.ctx))
    }

    /// Hand a prebuilt package to the backend
    pub fn add_job(&self, block: InfoBlock) -> JobResult<()> {
        self.backend.add_job(block)
    }

    /// Create a producer/consumer queue bound to `handle`
    pub fn create_queue<P: Copy + Send + 'static>(
        &self,
        capacity: usize,
        handle: &JobHandle,
    ) -> JobResult<Arc<ProdConsQueue<P>>> {
        ProdConsQueue::new(capacity, handle, Arc::clone(&self.ctx))
    }

    /// Poll/block on a job state; `timeout_ms < 0` waits forever.
    /// Returns `false` solely on timeout.
    pub fn wait_for_job(&self, state: &JobState, timeout_ms: i32) -> bool {
        self.backend.wait_for_job(state, timeout_ms)
    }

    pub fn num_worker_threads(&self) -> u32 {
        self.backend.num_worker_threads()
    }

    /// Check a wait semaphore out of the shared pool
    pub fn get_semaphore(&self) -> JobResult<SemaphoreHandle> {
        self.ctx.semaphores.checkout()
    }

    /// Return a wait semaphore to the shared pool
    pub fn free_semaphore(&self, handle: SemaphoreHandle) {
        self.ctx.semaphores.release(handle)
    }

    /// Job-scoped allocation, owned by the backend
    pub fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        self.backend.allocate(size, align)
    }

    /// Return job-scoped memory
    pub fn free(&self, ptr: *mut u8) {
        self.backend.free(ptr)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.backend.allocated_bytes()
    }

    /// Drain in-flight jobs and release the worker pool
    pub fn shut_down(&self) -> JobResult<()> {
        self.backend.shut_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn nop_invoker(_p: *const u8) {}

    #[test]
    fn test_manager_handle_registry() {
        let manager = JobManager::new(BackendConfig::default().num_workers(2)).unwrap();
        let a = manager.get_job_handle("skin", nop_invoker);
        let b = manager.get_job_handle("skin", nop_invoker);
        assert_eq!(a, b);
    }

    #[test]
    fn test_semaphore_passthrough() {
        let manager = JobManager::new(BackendConfig::default().num_workers(2)).unwrap();
        let handle = manager.get_semaphore().unwrap();
        manager.free_semaphore(handle);
    }

    #[test]
    fn test_allocator_passthrough() {
        let manager = JobManager::new(BackendConfig::default().num_workers(2)).unwrap();
        let ptr = manager.allocate(128, 16);
        assert!(!ptr.is_null());
        assert_eq!(manager.allocated_bytes(), 128);
        manager.free(ptr);
        assert_eq!(manager.allocated_bytes(), 0);
    }
}
