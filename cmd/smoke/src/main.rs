//! Smoke test: dispatch a burst of jobs, wait on each, print stats.
//!
//! Usage: smoke [num_jobs]   (JM_LOG_LEVEL=info for backend chatter)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jobmgr::{job_invoker, BackendConfig, CacheMode, JobManager, JobProfile, JobState};

static CHECKSUM: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy)]
struct HashParams {
    seed: u64,
    rounds: u32,
}

fn hash_job(params: &HashParams) {
    let mut x = params.seed;
    for _ in 0..params.rounds {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    CHECKSUM.fetch_xor(x, Ordering::Relaxed);
}

job_invoker!(hash_invoker, HashParams, hash_job);

fn main() {
    let num_jobs: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let manager = JobManager::new(BackendConfig::default()).expect("config");
    manager.init().expect("init");
    println!(
        "dispatching {} jobs across {} workers",
        num_jobs,
        manager.num_worker_threads()
    );

    let handle = manager.get_job_handle("hash", hash_invoker);
    let mut states = Vec::with_capacity(num_jobs);
    let start = std::time::Instant::now();

    for i in 0..num_jobs {
        let state = Arc::new(JobState::new());
        if i == 0 {
            state.attach_profile(Arc::new(JobProfile::new()));
        }
        manager
            .dispatcher()
            .params(&HashParams {
                seed: i as u64 + 1,
                rounds: 256,
            })
            .job_state(&state)
            .run(CacheMode::K64, &handle)
            .expect("dispatch");
        states.push(state);
    }

    for state in &states {
        manager.wait_for_job(state, -1);
    }
    let elapsed = start.elapsed();

    if let Some(profile) = states[0].profile() {
        let dispatch = profile.dispatch_ns.load(Ordering::Relaxed);
        let begin = profile.start_ns.load(Ordering::Relaxed);
        let end = profile.end_ns.load(Ordering::Relaxed);
        println!(
            "job 0: queued {} ns, body {} ns, worker {}",
            begin.saturating_sub(dispatch),
            end.saturating_sub(begin),
            profile.worker.load(Ordering::Relaxed)
        );
    }

    println!(
        "done: {} jobs in {:?} ({:.0} jobs/ms), checksum {:#x}",
        num_jobs,
        elapsed,
        num_jobs as f64 / elapsed.as_secs_f64() / 1000.0,
        CHECKSUM.load(Ordering::Relaxed)
    );

    manager.shut_down().expect("shutdown");
}
