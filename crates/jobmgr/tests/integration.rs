//! End-to-end tests over the full dispatch stack:
//! real worker pool, streaming queues, fibers.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jobmgr::{
    is_in_fiber_thread, job_invoker, worker_thread_id, BackendConfig, CacheMode, JobError,
    JobManager, JobProfile, JobState, QueuePacket,
};

#[derive(Clone, Copy)]
struct RecordParams {
    sink: usize,
    value: u32,
    delay_ms: u32,
}

impl RecordParams {
    fn new(sink: &Mutex<Vec<u32>>, value: u32) -> Self {
        Self {
            sink: sink as *const _ as usize,
            value,
            delay_ms: 0,
        }
    }

    fn with_delay(sink: &Mutex<Vec<u32>>, value: u32, delay_ms: u32) -> Self {
        Self {
            sink: sink as *const _ as usize,
            value,
            delay_ms,
        }
    }
}

fn record_job(params: &RecordParams) {
    if params.delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(params.delay_ms as u64));
    }
    let sink = unsafe { &*(params.sink as *const Mutex<Vec<u32>>) };
    sink.lock().unwrap().push(params.value);
}

job_invoker!(record_invoker, RecordParams, record_job);

fn manager(workers: usize) -> JobManager {
    let manager = JobManager::new(
        BackendConfig::default()
            .num_workers(workers)
            .num_dedicated_workers(1),
    )
    .unwrap();
    manager.init().unwrap();
    manager
}

#[test]
fn test_dispatch_and_wait() {
    let manager = manager(4);
    let handle = manager.get_job_handle("record", record_invoker);

    let sink = Mutex::new(Vec::new());
    let state = Arc::new(JobState::new());

    manager
        .dispatcher()
        .params(&RecordParams::new(&sink, 7))
        .job_state(&state)
        .run(CacheMode::K64, &handle)
        .unwrap();

    assert!(manager.wait_for_job(&state, -1));
    assert!(!state.is_running());
    assert_eq!(*sink.lock().unwrap(), vec![7]);

    manager.shut_down().unwrap();
}

#[test]
fn test_add_job_before_init_all_variants() {
    let manager = JobManager::new(BackendConfig::default().num_workers(2)).unwrap();
    // no init() on purpose
    let handle = manager.get_job_handle("record", record_invoker);

    let sink = Mutex::new(Vec::new());

    // direct dispatch
    let state = Arc::new(JobState::new());
    let direct = manager
        .dispatcher()
        .params(&RecordParams::new(&sink, 1))
        .job_state(&state)
        .run(CacheMode::K64, &handle);
    assert_eq!(direct.unwrap_err(), JobError::NotInitialized);

    // queued dispatch
    let queue = manager
        .create_queue::<RecordParams>(4, &handle)
        .unwrap();
    let queue_erased: Arc<dyn jobmgr::QueueConsumer> = queue;
    let queued = manager
        .dispatcher()
        .params(&RecordParams::new(&sink, 2))
        .queue(&queue_erased)
        .run(CacheMode::K64, &handle);
    assert_eq!(queued.unwrap_err(), JobError::NotInitialized);
}

#[test]
fn test_state_and_queue_double_bind_is_setup_violation() {
    let manager = manager(2);
    let handle = manager.get_job_handle("record", record_invoker);

    let queue = manager.create_queue::<RecordParams>(4, &handle).unwrap();
    let queue_erased: Arc<dyn jobmgr::QueueConsumer> = queue;
    let state = Arc::new(JobState::new());

    let res = manager
        .dispatcher()
        .job_state(&state)
        .queue(&queue_erased)
        .run(CacheMode::K64, &handle);
    assert_eq!(res.unwrap_err(), JobError::SetupViolation);

    manager.shut_down().unwrap();
}

#[test]
fn test_queue_fifo_streaming() {
    let manager = manager(4);
    let handle = manager.get_job_handle("record", record_invoker);
    let queue = manager.create_queue::<RecordParams>(16, &handle).unwrap();

    let sink = Mutex::new(Vec::new());
    for value in 0..12 {
        queue.add_packet(QueuePacket::new(RecordParams::new(&sink, value)), CacheMode::K64);
    }
    queue.wait_finished();

    assert_eq!(*sink.lock().unwrap(), (0..12).collect::<Vec<u32>>());
    assert!(queue.is_empty());
    assert_eq!(queue.pending_packets(), 0);

    manager.shut_down().unwrap();
}

#[test]
fn test_queue_backpressure_capacity_four() {
    // ring of 4, five packets, consumer delayed: the producer must
    // block on the fifth push and every packet still arrives in order
    let manager = manager(2);
    let handle = manager.get_job_handle("record", record_invoker);
    let queue = manager.create_queue::<RecordParams>(4, &handle).unwrap();

    let sink = Mutex::new(Vec::new());
    for value in 0..5 {
        queue.add_packet(
            QueuePacket::new(RecordParams::with_delay(&sink, value, 20)),
            CacheMode::K64,
        );
        // the ring never holds more than its capacity
        assert!(queue.pending_packets() <= 4);
    }
    queue.wait_finished();

    assert_eq!(*sink.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    manager.shut_down().unwrap();
}

#[test]
fn test_queue_per_packet_states() {
    let manager = manager(4);
    let handle = manager.get_job_handle("record", record_invoker);
    let queue = manager.create_queue::<RecordParams>(8, &handle).unwrap();

    let sink = Mutex::new(Vec::new());
    let states: Vec<Arc<JobState>> = (0..4).map(|_| Arc::new(JobState::new())).collect();
    for (value, state) in states.iter().enumerate() {
        queue.add_packet(
            QueuePacket::with_state(
                RecordParams::new(&sink, value as u32),
                Arc::clone(state),
            ),
            CacheMode::K64,
        );
    }
    for state in &states {
        assert!(manager.wait_for_job(state, -1));
    }
    queue.wait_finished();
    assert_eq!(*sink.lock().unwrap(), vec![0, 1, 2, 3]);

    manager.shut_down().unwrap();
}

#[test]
fn test_wait_for_job_timeout() {
    let manager = manager(2);
    let handle = manager.get_job_handle("record", record_invoker);

    let sink = Mutex::new(Vec::new());
    let state = Arc::new(JobState::new());
    manager
        .dispatcher()
        .params(&RecordParams::with_delay(&sink, 1, 200))
        .job_state(&state)
        .run(CacheMode::K64, &handle)
        .unwrap();

    // deadline passes while the job still sleeps
    let start = Instant::now();
    assert!(!manager.wait_for_job(&state, 10));
    assert!(start.elapsed() < Duration::from_millis(150));
    // the job is still running after a timeout, not stopped
    assert!(state.is_running());

    assert!(manager.wait_for_job(&state, -1));
    assert!(!state.is_running());
    manager.shut_down().unwrap();
}

#[test]
fn test_concurrent_waiters_single_stop() {
    // two threads wait on the same state; one completion wakes both
    for _ in 0..50 {
        let manager = manager(2);
        let handle = manager.get_job_handle("record", record_invoker);

        let sink = Mutex::new(Vec::new());
        let state = Arc::new(JobState::new());
        manager
            .dispatcher()
            .params(&RecordParams::with_delay(&sink, 1, 2))
            .job_state(&state)
            .run(CacheMode::K64, &handle)
            .unwrap();

        let ctx = Arc::clone(manager.ctx());
        let mut waiters = vec![];
        for _ in 0..2 {
            let (ctx, state) = (Arc::clone(&ctx), Arc::clone(&state));
            waiters.push(std::thread::spawn(move || {
                state.wait(&ctx.semaphores);
                assert!(!state.is_running());
            }));
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        manager.shut_down().unwrap();
    }
}

static FIBER_SEEN: AtomicUsize = AtomicUsize::new(0);

fn fiber_probe_job(params: &RecordParams) {
    if is_in_fiber_thread() {
        FIBER_SEEN.fetch_add(1, Ordering::SeqCst);
    }
    record_job(params);
}

job_invoker!(fiber_probe_invoker, RecordParams, fiber_probe_job);

#[test]
#[cfg(target_arch = "x86_64")]
fn test_jobs_layered_on_fibers() {
    let manager = JobManager::new(
        BackendConfig::default()
            .num_workers(2)
            .num_dedicated_workers(1)
            .run_jobs_on_fibers(true),
    )
    .unwrap();
    manager.init().unwrap();

    FIBER_SEEN.store(0, Ordering::SeqCst);
    let handle = manager.get_job_handle("fiber_probe", fiber_probe_invoker);
    let sink = Mutex::new(Vec::new());

    let states: Vec<Arc<JobState>> = (0..3).map(|_| Arc::new(JobState::new())).collect();
    for (value, state) in states.iter().enumerate() {
        manager
            .dispatcher()
            .params(&RecordParams::new(&sink, value as u32))
            .job_state(state)
            .run(CacheMode::K64, &handle)
            .unwrap();
    }
    for state in &states {
        assert!(manager.wait_for_job(state, -1));
    }

    assert_eq!(FIBER_SEEN.load(Ordering::SeqCst), 3);
    assert_eq!(sink.lock().unwrap().len(), 3);
    manager.shut_down().unwrap();
}

static SEEN_WORKER: AtomicU32 = AtomicU32::new(u32::MAX);

fn pin_probe_job(params: &RecordParams) {
    SEEN_WORKER.store(worker_thread_id(), Ordering::SeqCst);
    record_job(params);
}

job_invoker!(pin_probe_invoker, RecordParams, pin_probe_job);

#[test]
fn test_dedicated_job_pinned_to_reserved_worker() {
    // 3 workers, 1 dedicated: general workers are 0 and 1, worker 2 is
    // the reserved one
    let manager = JobManager::new(
        BackendConfig::default()
            .num_workers(3)
            .num_dedicated_workers(1),
    )
    .unwrap();
    manager.init().unwrap();

    SEEN_WORKER.store(u32::MAX, Ordering::SeqCst);
    let handle = manager.get_job_handle("pin_probe", pin_probe_invoker);
    let sink = Mutex::new(Vec::new());
    let state = Arc::new(JobState::new());

    manager
        .dispatcher()
        .params(&RecordParams::new(&sink, 1))
        .job_state(&state)
        .dedicated_thread_only()
        .run(CacheMode::K64, &handle)
        .unwrap();

    assert!(manager.wait_for_job(&state, -1));
    assert_eq!(SEEN_WORKER.load(Ordering::SeqCst), 2);
    manager.shut_down().unwrap();
}

fn callback_hit(arg: usize) {
    let hits = unsafe { &*(arg as *const AtomicUsize) };
    hits.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_callback_runs_before_wait_returns() {
    let manager = manager(2);
    let handle = manager.get_job_handle("record", record_invoker);

    let sink = Mutex::new(Vec::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(JobState::new());

    manager
        .dispatcher()
        .params(&RecordParams::new(&sink, 5))
        .callback(callback_hit, Arc::as_ptr(&hits) as usize)
        .job_state(&state)
        .run(CacheMode::K64, &handle)
        .unwrap();

    assert!(manager.wait_for_job(&state, -1));
    // completion wakes waiters only after the callback ran
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    manager.shut_down().unwrap();
}

#[test]
fn test_profile_stamps_populated() {
    let manager = manager(2);
    let handle = manager.get_job_handle("record", record_invoker);

    let sink = Mutex::new(Vec::new());
    let state = Arc::new(JobState::new());
    let profile = Arc::new(JobProfile::new());
    state.attach_profile(Arc::clone(&profile));

    manager
        .dispatcher()
        .params(&RecordParams::with_delay(&sink, 1, 5))
        .job_state(&state)
        .run(CacheMode::K64, &handle)
        .unwrap();
    assert!(manager.wait_for_job(&state, -1));

    let dispatch = profile.dispatch_ns.load(Ordering::Relaxed);
    let start = profile.start_ns.load(Ordering::Relaxed);
    let end = profile.end_ns.load(Ordering::Relaxed);
    assert!(dispatch > 0);
    assert!(start >= dispatch);
    assert!(end > start);
    assert!(profile.worker.load(Ordering::Relaxed) < 2);

    manager.shut_down().unwrap();
}

#[test]
fn test_queue_interleaves_job_types() {
    let manager = manager(4);
    let record = manager.get_job_handle("record", record_invoker);
    let pin = manager.get_job_handle("pin_probe", pin_probe_invoker);

    let queue = manager.create_queue::<RecordParams>(8, &record).unwrap();
    let sink = Mutex::new(Vec::new());

    queue.add_packet(QueuePacket::new(RecordParams::new(&sink, 0)), CacheMode::K64);
    queue.add_packet_for(
        QueuePacket::new(RecordParams::new(&sink, 1)),
        CacheMode::K64,
        &pin,
    );
    queue.add_packet(QueuePacket::new(RecordParams::new(&sink, 2)), CacheMode::K64);
    queue.wait_finished();

    assert_eq!(*sink.lock().unwrap(), vec![0, 1, 2]);
    manager.shut_down().unwrap();
}
