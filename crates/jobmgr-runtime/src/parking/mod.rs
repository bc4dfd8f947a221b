//! Idle-worker parking
//!
//! Workers park when their lanes are empty; dispatch wakes them. The
//! trait hides the platform primitive: futex on Linux, a condition
//! variable elsewhere.

use std::time::Duration;

/// Sleep/wake mechanism for idle workers
pub trait WorkerParking: Send + Sync {
    /// Park the current worker until signaled or timeout
    ///
    /// Returns `true` if woken by a signal. Workers re-check their
    /// lanes after returning regardless of the result.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker; the signal is lost if nobody is parked
    /// (which means workers are busy and will find the work themselves)
    fn wake_one(&self);

    /// Wake all parked workers (shutdown, bursts)
    fn wake_all(&self);

    /// Number of currently parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create the platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}
