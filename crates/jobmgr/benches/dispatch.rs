//! Dispatch throughput benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use jobmgr::{job_invoker, BackendConfig, CacheMode, JobManager, JobState, QueuePacket};

#[derive(Clone, Copy)]
struct SpinParams {
    rounds: u32,
}

fn spin_job(params: &SpinParams) {
    let mut x = 0x9e37_79b9u32;
    for _ in 0..params.rounds {
        x = x.wrapping_mul(0x85eb_ca6b).rotate_left(13);
    }
    criterion::black_box(x);
}

job_invoker!(spin_invoker, SpinParams, spin_job);

fn bench_direct_dispatch(c: &mut Criterion) {
    let manager = JobManager::new(BackendConfig::default()).unwrap();
    manager.init().unwrap();
    let handle = manager.get_job_handle("spin", spin_invoker);

    let mut group = c.benchmark_group("direct_dispatch");
    for batch in [16u32, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let states: Vec<Arc<JobState>> =
                    (0..batch).map(|_| Arc::new(JobState::new())).collect();
                for state in &states {
                    manager
                        .dispatcher()
                        .params(&SpinParams { rounds: 64 })
                        .job_state(state)
                        .run(CacheMode::K64, &handle)
                        .unwrap();
                }
                for state in &states {
                    manager.wait_for_job(state, -1);
                }
            });
        });
    }
    group.finish();
    manager.shut_down().unwrap();
}

fn bench_queue_streaming(c: &mut Criterion) {
    let manager = JobManager::new(BackendConfig::default()).unwrap();
    manager.init().unwrap();
    let handle = manager.get_job_handle("spin", spin_invoker);

    let mut group = c.benchmark_group("queue_streaming");
    for capacity in [8usize, 64] {
        let queue = manager.create_queue::<SpinParams>(capacity, &handle).unwrap();
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, _| {
                b.iter(|| {
                    for _ in 0..256 {
                        queue.add_packet(
                            QueuePacket::new(SpinParams { rounds: 64 }),
                            CacheMode::K64,
                        );
                    }
                    queue.wait_finished();
                });
            },
        );
    }
    group.finish();
    manager.shut_down().unwrap();
}

criterion_group!(benches, bench_direct_dispatch, bench_queue_streaming);
criterion_main!(benches);
