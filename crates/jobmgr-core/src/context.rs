//! Explicit scheduler context
//!
//! Everything the dispatch paths used to reach through ambient globals
//! for - the wait-semaphore pool and the backend - travels in one
//! `JobContext` value. The context is created when the backend is
//! initialized and torn down with it; operations that can block or
//! dispatch take it as a parameter.

use std::sync::{Arc, OnceLock};

use crate::constants::DEFAULT_SEMAPHORE_POOL;
use crate::error::{JobError, JobResult};
use crate::handle::JobRegistry;
use crate::semaphore::SemaphorePool;
use crate::traits::Backend;

/// Shared services for dispatch, waiting and queue streaming
pub struct JobContext {
    /// Pool of reusable wait semaphores
    pub semaphores: SemaphorePool,

    /// Job name registry (boundary to the embedding application)
    pub registry: JobRegistry,

    /// The scheduling backend; wired once during init
    backend: OnceLock<Arc<dyn Backend>>,

    /// Monotonic clock for profiling stamps; wired by the runtime
    clock: OnceLock<fn() -> u64>,
}

impl JobContext {
    /// Context with the default semaphore pool size
    pub fn new() -> Arc<Self> {
        Self::with_pool_size(DEFAULT_SEMAPHORE_POOL)
    }

    pub fn with_pool_size(pool_size: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphores: SemaphorePool::new(pool_size),
            registry: JobRegistry::new(),
            backend: OnceLock::new(),
            clock: OnceLock::new(),
        })
    }

    /// Wire a monotonic nanosecond clock; called once at init
    pub fn set_clock(&self, clock: fn() -> u64) {
        let _ = self.clock.set(clock);
    }

    /// Monotonic nanoseconds, 0 before a clock is wired
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.clock.get().map(|f| f()).unwrap_or(0)
    }

    /// Wire the backend into the context; called once at init
    pub fn set_backend(&self, backend: Arc<dyn Backend>) -> JobResult<()> {
        self.backend
            .set(backend)
            .map_err(|_| JobError::AlreadyInitialized)
    }

    /// The wired backend, `NotInitialized` before init
    pub fn backend(&self) -> JobResult<&Arc<dyn Backend>> {
        self.backend.get().ok_or(JobError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unset_reports_not_initialized() {
        let ctx = JobContext::new();
        assert!(matches!(ctx.backend(), Err(JobError::NotInitialized)));
    }
}
