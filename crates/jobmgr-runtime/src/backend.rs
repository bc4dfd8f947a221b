//! Thread-pool backend
//!
//! The scheduling authority of the dispatch system: a fixed pool of OS
//! worker threads, bounded per-worker priority lanes, and the lifecycle
//! state machine `Uninitialized -> Initialized -> ShuttingDown ->
//! ShutDown`. `add_job` never blocks on worker availability - placement
//! retries are bounded and end in `EnqueueTimeout`.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use jobmgr_core::context::JobContext;
use jobmgr_core::error::{JobError, JobResult};
use jobmgr_core::packet::InfoBlock;
use jobmgr_core::state::JobState;
use jobmgr_core::traits::{Backend, BackendState};
use jobmgr_core::{jm_debug, jm_info};

use crate::config::BackendConfig;
use crate::heap::JobHeap;
use crate::parking::{new_parking, WorkerParking};
use crate::time::now_ns;
use crate::worker::{worker_main, WorkerLanes};

/// State shared between the backend facade and its workers
pub(crate) struct BackendShared {
    pub config: BackendConfig,
    pub lanes: Vec<WorkerLanes>,
    pub parking: Box<dyn WorkerParking>,
    ctx: OnceLock<Arc<JobContext>>,
    shutdown: AtomicBool,
    in_flight: AtomicUsize,
}

impl BackendShared {
    /// Workers taking general dispatches; dedicated workers follow them
    #[inline]
    pub fn num_general_workers(&self) -> usize {
        self.config.num_workers - self.config.num_dedicated_workers
    }

    #[inline]
    pub fn is_dedicated(&self, worker_id: usize) -> bool {
        worker_id >= self.num_general_workers()
    }

    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn ctx(&self) -> &Arc<JobContext> {
        self.ctx.get().expect("worker running before backend init")
    }

    pub fn job_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Worker-pool backend
pub struct ThreadBackend {
    shared: Arc<BackendShared>,
    state: AtomicU8,
    next_worker: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    heap: JobHeap,
}

impl ThreadBackend {
    /// Create a backend; workers start at `init`
    pub fn new(config: BackendConfig) -> JobResult<Arc<Self>> {
        config.validate().map_err(|_| JobError::SetupViolation)?;

        let lanes = (0..config.num_workers)
            .map(|_| WorkerLanes::new(config.lane_depth))
            .collect();

        Ok(Arc::new(Self {
            shared: Arc::new(BackendShared {
                config,
                lanes,
                parking: new_parking(),
                ctx: OnceLock::new(),
                shutdown: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
            state: AtomicU8::new(BackendState::Uninitialized as u8),
            next_worker: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            heap: JobHeap::new(),
        }))
    }

    pub fn with_defaults() -> JobResult<Arc<Self>> {
        Self::new(BackendConfig::default())
    }

    pub fn config(&self) -> &BackendConfig {
        &self.shared.config
    }

    /// Jobs accepted but not yet completed
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }
}

impl Backend for ThreadBackend {
    fn init(&self, ctx: &Arc<JobContext>) -> JobResult<()> {
        self.state
            .compare_exchange(
                BackendState::Uninitialized as u8,
                BackendState::Initialized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| JobError::AlreadyInitialized)?;

        self.shared
            .ctx
            .set(Arc::clone(ctx))
            .map_err(|_| JobError::AlreadyInitialized)?;
        ctx.set_clock(now_ns);

        let mut handles = self.handles.lock().unwrap();
        for worker_id in 0..self.shared.config.num_workers {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("jobmgr-worker-{}", worker_id))
                .spawn(move || worker_main(worker_id, shared))
                .map_err(|_| JobError::SpawnFailed)?;
            handles.push(handle);
        }

        jm_info!(
            "backend initialized: {} workers ({} dedicated), fibers {}",
            self.shared.config.num_workers,
            self.shared.config.num_dedicated_workers,
            if self.shared.config.run_jobs_on_fibers { "on" } else { "off" }
        );
        Ok(())
    }

    fn shut_down(&self) -> JobResult<()> {
        self.state
            .compare_exchange(
                BackendState::Initialized as u8,
                BackendState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| JobError::NotInitialized)?;

        // drain in-flight jobs before releasing the workers
        while self.shared.in_flight.load(Ordering::Acquire) > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.parking.wake_all();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        self.state
            .store(BackendState::ShutDown as u8, Ordering::Release);
        jm_info!("backend shut down");
        Ok(())
    }

    fn add_job(&self, block: InfoBlock) -> JobResult<()> {
        if self.state() != BackendState::Initialized {
            return Err(JobError::NotInitialized);
        }
        block.validate()?;

        let shared = &self.shared;
        let general = shared.num_general_workers();

        if block.is_dedicated_thread_only() && shared.config.num_dedicated_workers == 0 {
            return Err(JobError::SetupViolation);
        }

        shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let mut block = block;
        for _sweep in 0..shared.config.enqueue_retry_budget {
            if block.is_dedicated_thread_only() {
                for i in 0..shared.config.num_dedicated_workers {
                    match shared.lanes[general + i].push(block) {
                        Ok(()) => {
                            shared.parking.wake_all();
                            return Ok(());
                        }
                        Err(rejected) => block = rejected,
                    }
                }
            } else {
                let start = self.next_worker.fetch_add(1, Ordering::Relaxed) % general;
                for offset in 0..general {
                    match shared.lanes[(start + offset) % general].push(block) {
                        Ok(()) => {
                            shared.parking.wake_one();
                            return Ok(());
                        }
                        Err(rejected) => block = rejected,
                    }
                }
            }
            core::hint::spin_loop();
        }

        // every lane stayed full for the whole budget
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        jm_debug!("add_job: lanes saturated past retry budget");
        Err(JobError::EnqueueTimeout)
    }

    fn num_worker_threads(&self) -> u32 {
        self.shared.config.num_workers as u32
    }

    fn state(&self) -> BackendState {
        BackendState::from(self.state.load(Ordering::Acquire))
    }

    fn wait_for_job(&self, state: &JobState, timeout_ms: i32) -> bool {
        if !state.is_running() {
            return true;
        }

        if timeout_ms < 0 {
            if let Some(ctx) = self.shared.ctx.get() {
                state.wait(&ctx.semaphores);
                return true;
            }
        }

        // deadline polling; false means timeout, the job is still running
        let deadline = if timeout_ms >= 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };
        while state.is_running() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        true
    }

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        self.heap.allocate(size, align)
    }

    fn free(&self, ptr: *mut u8) {
        self.heap.free(ptr);
    }

    fn allocated_bytes(&self) -> usize {
        self.heap.allocated_bytes()
    }
}
