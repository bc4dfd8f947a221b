//! # jobmgr-core
//!
//! Core types for the jobmgr job-dispatch system.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Worker threads, fibers and memory mapping live in `jobmgr-runtime`.
//!
//! ## Modules
//!
//! - `handle` - Registered job identity (name, id, invoker)
//! - `sync` - Word-sized atomic running/finished state with lazy waiter attach
//! - `semaphore` - Pooled blocking wait primitive behind generation-tagged handles
//! - `state` - Per-job completion state plus optional profiling hooks
//! - `packet` - Flat dispatch record (`InfoBlock`) and op-mode encodings
//! - `queue` - Bounded single-producer/single-consumer packet ring
//! - `delegator` - Builder that packages a typed invocation for the backend
//! - `traits` - Backend contract and queue-consumer erasure
//! - `context` - Explicit scheduler context (pool + backend), no globals
//! - `error` - Error types
//! - `spinlock` - Internal spinlock primitive
//! - `jlog` - Kernel-style debug printing macros

#![allow(dead_code)]

pub mod context;
pub mod delegator;
pub mod error;
pub mod handle;
pub mod jlog;
pub mod packet;
pub mod queue;
pub mod semaphore;
pub mod spinlock;
pub mod state;
pub mod sync;
pub mod traits;

// Re-exports for convenience
pub use context::JobContext;
pub use delegator::JobDispatcher;
pub use error::{JobError, JobResult};
pub use handle::{JobHandle, JobRegistry, Invoker};
pub use packet::{CacheMode, Completion, InfoBlock, PagingMode, QueuePacket};
pub use queue::ProdConsQueue;
pub use semaphore::{JobSemaphore, SemaphoreHandle, SemaphorePool};
pub use spinlock::SpinLock;
pub use state::{JobProfile, JobState};
pub use sync::SyncVar;
pub use traits::{Backend, BackendState, QueueConsumer};

/// Shared constants
pub mod constants {
    /// Bytes available for the parameter blob inside one `InfoBlock`.
    ///
    /// Chosen so the blob plus the dispatch bookkeeping stays within two
    /// cache-line pairs on 64-bit targets.
    pub const PARAM_BLOB_SIZE: usize = 184;

    /// Minimum ring capacity for a producer/consumer queue.
    /// A queue must be able to hold more than two packets to be useful.
    pub const MIN_QUEUE_CAPACITY: usize = 3;

    /// Default number of pooled wait semaphores.
    pub const DEFAULT_SEMAPHORE_POOL: usize = 64;

    /// Number of switch timestamps a fiber records before wrapping.
    pub const FIBER_SWITCH_RECORDS: usize = 32;

    /// Sentinel for "no worker thread" (caller context).
    pub const WORKER_NONE: u32 = u32::MAX;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
