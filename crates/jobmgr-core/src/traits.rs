//! Backend contract
//!
//! The scheduling authority lives behind the `Backend` trait: it owns
//! the worker threads, accepts dispatch packages, and exposes the
//! allocation service the dispatch paths use. The thread-pool backend
//! ships in `jobmgr-runtime`; off-load backends (coprocessors, GPU
//! contexts) plug in behind the same contract.

use core::fmt;

use crate::context::JobContext;
use crate::error::JobResult;
use crate::packet::InfoBlock;

/// Lifecycle of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendState {
    Uninitialized = 0,
    Initialized = 1,
    ShuttingDown = 2,
    ShutDown = 3,
}

impl From<u8> for BackendState {
    fn from(v: u8) -> Self {
        match v {
            1 => BackendState::Initialized,
            2 => BackendState::ShuttingDown,
            3 => BackendState::ShutDown,
            _ => BackendState::Uninitialized,
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendState::Uninitialized => write!(f, "uninitialized"),
            BackendState::Initialized => write!(f, "initialized"),
            BackendState::ShuttingDown => write!(f, "shutting down"),
            BackendState::ShutDown => write!(f, "shut down"),
        }
    }
}

/// The scheduling authority behind every dispatch
///
/// `init` is called exactly once before any `add_job`; `add_job` before
/// `init` or after `shut_down` reports `NotInitialized` rather than
/// crashing. `add_job` never blocks the caller on worker availability -
/// backpressure only exists on the producer/consumer queue path.
pub trait Backend: Send + Sync {
    /// Bring up worker threads; `Uninitialized -> Initialized`
    fn init(&self, ctx: &std::sync::Arc<JobContext>) -> JobResult<()>;

    /// Drain in-flight jobs, then release workers;
    /// `Initialized -> ShuttingDown -> ShutDown`
    fn shut_down(&self) -> JobResult<()>;

    /// Enqueue a dispatch package onto an available worker
    fn add_job(&self, block: InfoBlock) -> JobResult<()>;

    /// Number of worker threads in the pool
    fn num_worker_threads(&self) -> u32;

    /// Current lifecycle state
    fn state(&self) -> BackendState;

    /// Poll/block on a job state, honoring a millisecond timeout
    ///
    /// `timeout_ms < 0` waits forever. Returns `false` solely on
    /// timeout - a job either finishes or it is still running; failure
    /// is not a distinct state.
    fn wait_for_job(&self, state: &crate::state::JobState, timeout_ms: i32) -> bool {
        if !state.is_running() {
            return true;
        }
        let deadline = if timeout_ms >= 0 {
            Some(std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };
        while state.is_running() {
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return false;
                }
            }
            std::thread::sleep(std::time::Duration::from_micros(100));
        }
        true
    }

    /// Job-scoped allocation; memory must be returned via `free`
    fn allocate(&self, size: usize, align: usize) -> *mut u8;

    /// Return memory obtained from `allocate`
    fn free(&self, ptr: *mut u8);

    /// Bytes currently outstanding from the job-scoped allocator
    fn allocated_bytes(&self) -> usize;
}

/// Erased consumer side of a producer/consumer queue
///
/// A worker that picks up a queue-routed `InfoBlock` becomes the
/// queue's consumer and drains it through this trait.
pub trait QueueConsumer: Send + Sync {
    /// Drain published packets; returns when the queue transitions to
    /// idle (the drain itself performs that transition atomically)
    fn consume(&self, ctx: &JobContext, worker_id: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_state_roundtrip() {
        assert_eq!(BackendState::from(1), BackendState::Initialized);
        assert_eq!(BackendState::from(3), BackendState::ShutDown);
        assert_eq!(BackendState::from(250), BackendState::Uninitialized);
    }

    #[test]
    fn test_backend_state_display() {
        assert_eq!(format!("{}", BackendState::ShuttingDown), "shutting down");
    }
}
