//! Flat dispatch records
//!
//! An `InfoBlock` is the backend-neutral description of one job
//! invocation: parameter blob, invoker, callback, scheduling flags and
//! the operating mode (cache and paging hints) for off-load backends.
//! It is built once by the delegator or queue, then moved by value onto
//! a worker lane - never shared by reference.

use std::sync::Arc;

use crate::constants::PARAM_BLOB_SIZE;
use crate::error::{JobError, JobResult};
use crate::handle::{Invoker, JobHandle};
use crate::state::JobState;
use crate::traits::QueueConsumer;

/// Cache-size hint for backends that stage job code/data
///
/// Encoded in the upper bits of the op-mode byte; the raw values are the
/// on-wire encoding (size in KB = value >> 3 << 2... see `max_cache_kb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheMode {
    /// No cache, bypassing
    None = 0,
    /// Max cache size 4 KB
    K4 = 8,
    /// Max cache size 8 KB
    K8 = 16,
    /// Max cache size 16 KB
    K16 = 32,
    /// Max cache size 32 KB
    K32 = 64,
    /// Max cache size 64 KB, default
    K64 = 128,
}

/// Code-paging hint for backends with paged local stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PagingMode {
    /// Single resident page
    Single = 0,
    /// Double-buffered paging
    Dual = 1,
}

/// Bit layout of the op-mode byte
pub mod op_mode {
    /// Paging-mode bits
    pub const PAGE_MODE_MASK: u8 = 0b0000_0011;
    /// Off-load (vs. general) job bit
    pub const JOB_TYPE_MASK: u8 = 0b0000_0100;
    /// Cache-mode bits
    pub const CACHE_MODE_MASK: u8 = !0b0000_0111;

    pub const DEFAULT: u8 = super::CacheMode::K64 as u8 | super::PagingMode::Single as u8;
}

/// Scheduling flags carried by an `InfoBlock`
pub mod flags {
    /// Job may only run on the reserved dedicated worker
    pub const DEDICATED_THREAD_ONLY: u8 = 0x1;
    /// Job goes onto the high-priority lane
    pub const HIGH_PRIORITY: u8 = 0x2;
    /// Completion is routed through a producer/consumer queue
    pub const HAS_QUEUE: u8 = 0x4;
}

/// Callback invoked on the worker after the job body completes
///
/// The argument is an opaque pointer-sized token chosen by the caller
/// (the same convention the fiber entry uses).
pub type CallbackFn = fn(usize);

/// Completion routing for a dispatched job
///
/// A job reports completion either through a caller-held state or
/// through membership in a streaming queue, never both.
#[derive(Clone, Default)]
pub enum Completion {
    #[default]
    None,
    State(Arc<JobState>),
    Queue(Arc<dyn QueueConsumer>),
}

impl Completion {
    pub fn is_queue(&self) -> bool {
        matches!(self, Completion::Queue(_))
    }
}

/// Backend-neutral description of one job invocation
///
/// Cache-line aligned; the parameter blob is bounded so a block is a
/// fixed-stride record wherever it is stored.
#[repr(align(64))]
pub struct InfoBlock {
    params: [u8; PARAM_BLOB_SIZE],
    param_len: u16,
    invoker: Invoker,
    job_id: u32,
    invoker_idx: u32,
    op_mode: u8,
    flags: u8,
    callback: Option<(CallbackFn, usize)>,
    completion: Completion,
}

impl InfoBlock {
    /// Create a block for `handle` with default op mode and no params
    pub fn new(handle: &JobHandle) -> Self {
        Self {
            params: [0; PARAM_BLOB_SIZE],
            param_len: 0,
            invoker: handle.invoker(),
            job_id: handle.job_id(),
            invoker_idx: handle.invoker_idx(),
            op_mode: op_mode::DEFAULT,
            flags: 0,
            callback: None,
            completion: Completion::None,
        }
    }

    /// Copy a typed parameter struct into the blob
    ///
    /// Fails with `JobTooLarge` when `T` exceeds the fixed capacity.
    pub fn set_params<T: Copy + Send>(&mut self, value: &T) -> JobResult<()> {
        let size = core::mem::size_of::<T>();
        if size > PARAM_BLOB_SIZE {
            return Err(JobError::JobTooLarge);
        }
        // Safety: size checked against the blob, T is Copy (plain bytes)
        unsafe {
            core::ptr::copy_nonoverlapping(
                value as *const T as *const u8,
                self.params.as_mut_ptr(),
                size,
            );
        }
        self.param_len = size as u16;
        Ok(())
    }

    /// Copy an already-serialized parameter blob
    pub fn set_params_bytes(&mut self, bytes: &[u8]) -> JobResult<()> {
        if bytes.len() > PARAM_BLOB_SIZE {
            return Err(JobError::JobTooLarge);
        }
        self.params[..bytes.len()].copy_from_slice(bytes);
        self.param_len = bytes.len() as u16;
        Ok(())
    }

    /// Pointer to the parameter blob for the invoker
    #[inline]
    pub fn params_ptr(&self) -> *const u8 {
        self.params.as_ptr()
    }

    #[inline]
    pub fn param_len(&self) -> usize {
        self.param_len as usize
    }

    #[inline]
    pub fn invoker(&self) -> Invoker {
        self.invoker
    }

    #[inline]
    pub fn job_id(&self) -> u32 {
        self.job_id
    }

    #[inline]
    pub fn invoker_idx(&self) -> u32 {
        self.invoker_idx
    }

    pub fn set_callback(&mut self, func: CallbackFn, arg: usize) {
        self.callback = Some((func, arg));
    }

    #[inline]
    pub fn callback(&self) -> Option<(CallbackFn, usize)> {
        self.callback
    }

    pub fn set_completion(&mut self, completion: Completion) {
        if completion.is_queue() {
            self.flags |= flags::HAS_QUEUE;
        } else {
            self.flags &= !flags::HAS_QUEUE;
        }
        self.completion = completion;
    }

    #[inline]
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn take_completion(&mut self) -> Completion {
        core::mem::take(&mut self.completion)
    }

    // flag accessors

    pub fn set_dedicated_thread_only(&mut self, on: bool) {
        if on {
            self.flags |= flags::DEDICATED_THREAD_ONLY;
        } else {
            self.flags &= !flags::DEDICATED_THREAD_ONLY;
        }
    }

    #[inline]
    pub fn is_dedicated_thread_only(&self) -> bool {
        self.flags & flags::DEDICATED_THREAD_ONLY != 0
    }

    pub fn set_high_priority(&mut self, on: bool) {
        if on {
            self.flags |= flags::HIGH_PRIORITY;
        } else {
            self.flags &= !flags::HIGH_PRIORITY;
        }
    }

    #[inline]
    pub fn is_high_priority(&self) -> bool {
        self.flags & flags::HIGH_PRIORITY != 0
    }

    #[inline]
    pub fn has_queue(&self) -> bool {
        self.flags & flags::HAS_QUEUE != 0
    }

    // op mode accessors

    pub fn set_op_mode(&mut self, mode: u8) {
        self.op_mode = mode;
    }

    #[inline]
    pub fn op_mode(&self) -> u8 {
        self.op_mode
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.op_mode = (self.op_mode & !op_mode::CACHE_MODE_MASK) | mode as u8;
    }

    pub fn set_paging_mode(&mut self, mode: PagingMode) {
        self.op_mode = (self.op_mode & !op_mode::PAGE_MODE_MASK) | mode as u8;
    }

    /// Off-load jobs only run on a worker that is a different execution
    /// unit (e.g. a coprocessor backend)
    pub fn set_off_load(&mut self, on: bool) {
        if on {
            self.op_mode |= op_mode::JOB_TYPE_MASK;
        } else {
            self.op_mode &= !op_mode::JOB_TYPE_MASK;
        }
    }

    #[inline]
    pub fn is_off_load(&self) -> bool {
        self.op_mode & op_mode::JOB_TYPE_MASK != 0
    }

    /// Maximum cache size encoded in the op mode, in KB
    pub fn max_cache_kb(&self) -> u32 {
        ((self.op_mode & op_mode::CACHE_MODE_MASK) as u32) >> 1
    }

    /// Sanity check before handing the block to a backend
    pub fn validate(&self) -> JobResult<()> {
        if self.invoker_idx == crate::handle::INVALID_INVOKER_IDX {
            return Err(JobError::InvalidJobHandle);
        }
        if self.has_queue() != self.completion.is_queue() {
            return Err(JobError::SetupViolation);
        }
        Ok(())
    }
}

/// One parameter packet for a producer/consumer queue
///
/// Carries the typed parameters plus per-packet completion state and
/// the scheduling bits that travel with the packet rather than with the
/// queue.
pub struct QueuePacket<P: Copy + Send> {
    pub params: P,
    pub state: Option<Arc<JobState>>,
    pub dedicated_thread_only: bool,
}

impl<P: Copy + Send> QueuePacket<P> {
    pub fn new(params: P) -> Self {
        Self {
            params,
            state: None,
            dedicated_thread_only: false,
        }
    }

    pub fn with_state(params: P, state: Arc<JobState>) -> Self {
        Self {
            params,
            state: Some(state),
            dedicated_thread_only: false,
        }
    }
}

// Verify the block stays cache-line aligned
const _: () = {
    assert!(core::mem::align_of::<InfoBlock>() == 64);
    assert!(core::mem::size_of::<InfoBlock>() % 64 == 0);
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::JobRegistry;

    unsafe fn test_invoker(_p: *const u8) {}

    fn handle() -> JobHandle {
        let reg = JobRegistry::new();
        reg.get_job_handle("packet_test", test_invoker)
    }

    #[test]
    fn test_params_bounded() {
        let mut block = InfoBlock::new(&handle());
        let small = [1u8; 16];
        assert!(block.set_params(&small).is_ok());
        assert_eq!(block.param_len(), 16);

        let huge = [0u8; PARAM_BLOB_SIZE + 1];
        assert_eq!(block.set_params(&huge).unwrap_err(), JobError::JobTooLarge);
    }

    #[test]
    fn test_flag_accessors() {
        let mut block = InfoBlock::new(&handle());
        assert!(!block.is_high_priority());
        block.set_high_priority(true);
        block.set_dedicated_thread_only(true);
        assert!(block.is_high_priority());
        assert!(block.is_dedicated_thread_only());
        block.set_dedicated_thread_only(false);
        assert!(!block.is_dedicated_thread_only());
    }

    #[test]
    fn test_op_mode_encoding() {
        let mut block = InfoBlock::new(&handle());
        block.set_cache_mode(CacheMode::K16);
        block.set_paging_mode(PagingMode::Dual);
        assert_eq!(block.max_cache_kb(), 16);
        assert!(!block.is_off_load());
        block.set_off_load(true);
        assert!(block.is_off_load());
        // cache bits survive the job-type change
        assert_eq!(block.max_cache_kb(), 16);
    }

    #[test]
    fn test_validate_rejects_invalid_handle() {
        let block = InfoBlock::new(&JobHandle::INVALID);
        assert_eq!(block.validate().unwrap_err(), JobError::InvalidJobHandle);
    }
}
