//! Backend configuration

use std::time::Duration;

/// Maximum workers (OS threads)
pub const MAX_WORKERS: usize = 64;

/// Default fiber stack size (128 KB)
pub const DEFAULT_FIBER_STACK: usize = 128 << 10;

/// Configuration for the thread-pool backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Number of worker threads (defaults to CPU count)
    pub num_workers: usize,

    /// Workers reserved for dedicated-thread-only jobs
    pub num_dedicated_workers: usize,

    /// Per-worker lane depth (packets each priority lane can hold)
    pub lane_depth: usize,

    /// Placement retry sweeps over the pool before `EnqueueTimeout`
    pub enqueue_retry_budget: usize,

    /// Size of the shared wait-semaphore pool
    pub semaphore_pool_size: usize,

    /// Stack size for per-job fibers
    pub fiber_stack_size: usize,

    /// Run each job body on a cooperative fiber
    pub run_jobs_on_fibers: bool,

    /// How long an idle worker parks before re-checking for work
    pub park_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus.min(MAX_WORKERS),
            num_dedicated_workers: 1,
            lane_depth: 256,
            enqueue_retry_budget: 1024,
            semaphore_pool_size: jobmgr_core::constants::DEFAULT_SEMAPHORE_POOL,
            fiber_stack_size: DEFAULT_FIBER_STACK,
            run_jobs_on_fibers: false,
            park_interval: Duration::from_millis(10),
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of worker threads
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.min(MAX_WORKERS);
        self
    }

    /// Set number of dedicated workers
    pub fn num_dedicated_workers(mut self, n: usize) -> Self {
        self.num_dedicated_workers = n;
        self
    }

    /// Set per-worker lane depth
    pub fn lane_depth(mut self, n: usize) -> Self {
        self.lane_depth = n;
        self
    }

    /// Set the placement retry budget
    pub fn enqueue_retry_budget(mut self, n: usize) -> Self {
        self.enqueue_retry_budget = n;
        self
    }

    /// Set the fiber stack size
    pub fn fiber_stack_size(mut self, n: usize) -> Self {
        self.fiber_stack_size = n;
        self
    }

    /// Run job bodies on cooperative fibers
    pub fn run_jobs_on_fibers(mut self, on: bool) -> Self {
        self.run_jobs_on_fibers = on;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_workers == 0 {
            return Err("num_workers must be at least 1");
        }
        if self.num_workers > MAX_WORKERS {
            return Err("num_workers exceeds maximum");
        }
        if self.num_dedicated_workers >= self.num_workers {
            return Err("num_dedicated_workers must be less than num_workers");
        }
        if self.lane_depth < 2 {
            return Err("lane_depth must be at least 2");
        }
        if self.fiber_stack_size < 4096 {
            return Err("fiber_stack_size must be at least one page");
        }
        Ok(())
    }
}
