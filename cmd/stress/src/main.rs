//! Stress test: hammer a small producer/consumer queue so the producer
//! keeps hitting the backpressure path, then verify nothing was lost
//! or reordered.
//!
//! Usage: stress [num_packets] [ring_capacity]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use jobmgr::{job_invoker, BackendConfig, CacheMode, JobManager, QueuePacket};

static RECEIVED: AtomicU64 = AtomicU64::new(0);
static OUT_OF_ORDER: AtomicU64 = AtomicU64::new(0);
static LAST_SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy)]
struct SeqParams {
    seq: u32,
}

fn seq_job(params: &SeqParams) {
    // strict FIFO: every packet must arrive exactly after its predecessor
    let prev = LAST_SEQ.swap(params.seq, Ordering::SeqCst);
    if params.seq != 0 && params.seq != prev + 1 {
        OUT_OF_ORDER.fetch_add(1, Ordering::SeqCst);
    }
    RECEIVED.fetch_add(1, Ordering::SeqCst);
}

job_invoker!(seq_invoker, SeqParams, seq_job);

fn main() {
    let num_packets: u32 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let capacity: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);

    let manager = JobManager::new(BackendConfig::default()).expect("config");
    manager.init().expect("init");

    let handle = manager.get_job_handle("seq", seq_invoker);
    let queue = manager
        .create_queue::<SeqParams>(capacity, &handle)
        .expect("queue");

    println!(
        "streaming {} packets through a {}-slot ring on {} workers",
        num_packets,
        capacity,
        manager.num_worker_threads()
    );

    let start = std::time::Instant::now();
    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            for seq in 0..num_packets {
                queue.add_packet(QueuePacket::new(SeqParams { seq }), CacheMode::K64);
            }
        })
    };

    producer.join().unwrap();
    queue.wait_finished();
    let elapsed = start.elapsed();

    let received = RECEIVED.load(Ordering::SeqCst);
    let reordered = OUT_OF_ORDER.load(Ordering::SeqCst);
    println!(
        "done in {:?}: {} received, {} reordered, {:.0} packets/ms",
        elapsed,
        received,
        reordered,
        received as f64 / elapsed.as_secs_f64() / 1000.0
    );

    assert_eq!(received as u32, num_packets, "lost packets");
    assert_eq!(reordered, 0, "FIFO violated");
    manager.shut_down().expect("shutdown");
}
