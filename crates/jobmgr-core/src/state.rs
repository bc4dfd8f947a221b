//! Per-job completion state
//!
//! `JobState` is the caller-visible handle for "is my job done":
//! a `SyncVar` plus optional profiling hook points. The profiling sink
//! is populated only when attached; its absence changes nothing about
//! scheduling.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::constants::WORKER_NONE;
use crate::semaphore::SemaphorePool;
use crate::sync::SyncVar;

/// Timestamps and worker id for one job invocation
///
/// All fields are atomics so the dispatching thread and the executing
/// worker can stamp them without coordination. Values are nanoseconds
/// on the embedding runtime's monotonic clock; zero means "not stamped".
#[derive(Debug, Default)]
pub struct JobProfile {
    pub dispatch_ns: AtomicU64,
    pub start_ns: AtomicU64,
    pub end_ns: AtomicU64,
    pub worker: AtomicU32,
}

impl JobProfile {
    pub fn new() -> Self {
        Self {
            dispatch_ns: AtomicU64::new(0),
            start_ns: AtomicU64::new(0),
            end_ns: AtomicU64::new(0),
            worker: AtomicU32::new(WORKER_NONE),
        }
    }
}

/// Completion state of one job
#[derive(Debug, Default)]
pub struct JobState {
    sync: SyncVar,
    profile: OnceLock<Arc<JobProfile>>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            sync: SyncVar::new(),
            profile: OnceLock::new(),
        }
    }

    /// Attach a profiling sink; stamps are written from now on
    pub fn attach_profile(&self, profile: Arc<JobProfile>) {
        let _ = self.profile.set(profile);
    }

    /// The attached profiling sink, if any
    pub fn profile(&self) -> Option<&Arc<JobProfile>> {
        self.profile.get()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.sync.is_running()
    }

    /// Mark running; called by the dispatch path before publication
    pub fn set_running(&self) {
        self.sync.set_running();
    }

    /// Mark finished, waking waiters
    pub fn set_stopped(&self, pool: &SemaphorePool) {
        self.sync.set_stopped(pool);
    }

    /// Block until finished
    pub fn wait(&self, pool: &SemaphorePool) {
        self.sync.wait(pool);
    }

    /// Stamp the dispatch timestamp if a sink is attached
    pub fn stamp_dispatch(&self, now_ns: u64) {
        if let Some(p) = self.profile.get() {
            p.dispatch_ns.store(now_ns, Ordering::Relaxed);
        }
    }

    /// Stamp execution start and the worker index if a sink is attached
    pub fn stamp_start(&self, now_ns: u64, worker: u32) {
        if let Some(p) = self.profile.get() {
            p.start_ns.store(now_ns, Ordering::Relaxed);
            p.worker.store(worker, Ordering::Relaxed);
        }
    }

    /// Stamp execution end if a sink is attached
    pub fn stamp_end(&self, now_ns: u64) {
        if let Some(p) = self.profile.get() {
            p.end_ns.store(now_ns, Ordering::Relaxed);
        }
    }
}
