//! # jobmgr-runtime
//!
//! Platform-specific runtime for the jobmgr dispatch system.
//!
//! This crate provides:
//! - The thread-pool backend (worker threads, priority lanes, parking)
//! - Cooperative fibers (architecture-specific context switching)
//! - Memory mapping for fiber stacks (mmap + guard page)
//! - The job-scoped allocator

#![allow(dead_code)]

pub mod backend;
pub mod config;
pub mod fiber;
pub mod heap;
pub mod parking;
pub mod stack;
pub mod time;
pub mod worker;

mod arch;

// Re-exports
pub use backend::ThreadBackend;
pub use config::BackendConfig;
pub use fiber::{
    create_fiber, fiber_yield_time, is_in_fiber_thread, yield_fiber, FiberFn, FiberTask,
};
pub use parking::{new_parking, WorkerParking};
pub use time::now_ns;
pub use worker::worker_thread_id;

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub(crate) use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub(crate) use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture");
    }
}
