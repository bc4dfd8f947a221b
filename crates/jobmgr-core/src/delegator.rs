//! Job delegation
//!
//! `JobDispatcher` adapts a strongly-typed job invocation into the
//! backend-neutral `InfoBlock` the scheduler consumes: bind parameters,
//! a callback, a completion route and scheduling flags, then `run`.
//! The dispatcher performs no retries; the backend's result code is
//! returned to the caller verbatim.

use std::sync::Arc;

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::handle::JobHandle;
use crate::packet::{CacheMode, CallbackFn, Completion, InfoBlock, PagingMode};
use crate::state::JobState;
use crate::traits::QueueConsumer;

/// Builder for one dispatch
///
/// A job reports completion either through a bound `JobState` or
/// through membership in a streaming queue - binding both is a setup
/// violation reported by `run`.
pub struct JobDispatcher {
    ctx: Arc<JobContext>,
    params: Option<Vec<u8>>,
    param_len: usize,
    callback: Option<(CallbackFn, usize)>,
    state: Option<Arc<JobState>>,
    queue: Option<Arc<dyn QueueConsumer>>,
    high_priority: bool,
    dedicated_thread_only: bool,
}

impl JobDispatcher {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            params: None,
            param_len: 0,
            callback: None,
            state: None,
            queue: None,
            high_priority: false,
            dedicated_thread_only: false,
        }
    }

    /// Bind the typed parameter struct
    pub fn params<T: Copy + Send>(&mut self, value: &T) -> &mut Self {
        let size = core::mem::size_of::<T>();
        let mut bytes = vec![0u8; size];
        // Safety: T is Copy, plain byte copy
        unsafe {
            core::ptr::copy_nonoverlapping(value as *const T as *const u8, bytes.as_mut_ptr(), size);
        }
        self.params = Some(bytes);
        self.param_len = size;
        self
    }

    /// Bind a completion callback, invoked on the worker after the job body
    pub fn callback(&mut self, func: CallbackFn, arg: usize) -> &mut Self {
        self.callback = Some((func, arg));
        self
    }

    /// Bind a completion state for direct waiting
    pub fn job_state(&mut self, state: &Arc<JobState>) -> &mut Self {
        self.state = Some(Arc::clone(state));
        self
    }

    /// Bind a consumer queue instead of a direct state
    pub fn queue(&mut self, queue: &Arc<dyn QueueConsumer>) -> &mut Self {
        self.queue = Some(Arc::clone(queue));
        self
    }

    /// Schedule on the high-priority lane
    pub fn high_priority(&mut self) -> &mut Self {
        self.high_priority = true;
        self
    }

    /// Pin to the reserved dedicated worker
    pub fn dedicated_thread_only(&mut self) -> &mut Self {
        self.dedicated_thread_only = true;
        self
    }

    /// Package the dispatch and hand it to the backend
    ///
    /// Returns the backend's result code; retry policy, if any, is the
    /// caller's responsibility.
    pub fn run(&mut self, cache_mode: CacheMode, handle: &JobHandle) -> JobResult<()> {
        self.run_with(cache_mode, PagingMode::Single, handle)
    }

    /// `run` with an explicit paging hint
    pub fn run_with(
        &mut self,
        cache_mode: CacheMode,
        paging_mode: PagingMode,
        handle: &JobHandle,
    ) -> JobResult<()> {
        if !handle.is_valid() {
            return Err(JobError::InvalidJobHandle);
        }
        if self.state.is_some() && self.queue.is_some() {
            // a job signals completion through exactly one route
            return Err(JobError::SetupViolation);
        }

        let mut block = InfoBlock::new(handle);
        block.set_cache_mode(cache_mode);
        block.set_paging_mode(paging_mode);
        block.set_high_priority(self.high_priority);
        block.set_dedicated_thread_only(self.dedicated_thread_only);

        if let Some(bytes) = self.params.take() {
            if bytes.len() > crate::constants::PARAM_BLOB_SIZE {
                return Err(JobError::JobTooLarge);
            }
            // re-copy through the typed-blob path to keep one bound check
            block.set_params_bytes(&bytes)?;
        }

        if let Some((func, arg)) = self.callback {
            block.set_callback(func, arg);
        }

        let mut bound_state = None;
        if let Some(queue) = self.queue.take() {
            block.set_completion(Completion::Queue(queue));
        } else if let Some(state) = self.state.take() {
            state.set_running();
            state.stamp_dispatch(self.ctx.now_ns());
            bound_state = Some(Arc::clone(&state));
            block.set_completion(Completion::State(state));
        }

        let result = self
            .ctx
            .backend()
            .and_then(|backend| backend.add_job(block));
        if result.is_err() {
            // a rejected dispatch never ran; the bound state must not
            // read as running (and must accept a retried bind)
            if let Some(state) = bound_state {
                state.set_stopped(&self.ctx.semaphores);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn nop_invoker(_p: *const u8) {}

    #[test]
    fn test_run_before_init_reports_not_initialized() {
        let ctx = JobContext::new();
        let handle = ctx.registry.get_job_handle("orphan", nop_invoker);
        let res = JobDispatcher::new(Arc::clone(&ctx)).run(CacheMode::K64, &handle);
        assert_eq!(res.unwrap_err(), JobError::NotInitialized);
    }

    #[test]
    fn test_invalid_handle_rejected() {
        let ctx = JobContext::new();
        let res = JobDispatcher::new(ctx).run(CacheMode::K64, &JobHandle::INVALID);
        assert_eq!(res.unwrap_err(), JobError::InvalidJobHandle);
    }

    #[test]
    fn test_oversized_params_rejected() {
        let ctx = JobContext::new();
        let handle = ctx.registry.get_job_handle("big", nop_invoker);
        let huge = [0u8; crate::constants::PARAM_BLOB_SIZE + 8];
        let res = JobDispatcher::new(ctx)
            .params(&huge)
            .run(CacheMode::K64, &handle);
        assert_eq!(res.unwrap_err(), JobError::JobTooLarge);
    }
}
