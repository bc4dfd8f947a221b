//! Registered job identity
//!
//! A `JobHandle` is the immutable identity of a registered job type:
//! display name, dense job id, invoker-table index and the invoker
//! function that decomposes a parameter blob and calls the job entry.
//!
//! The full string-interning repository is owned by the embedding
//! application; `JobRegistry` implements just the boundary contract:
//! lookup by name is safe from any thread, and handle identity is
//! stable for the process lifetime.

use core::cmp::Ordering as CmpOrdering;
use core::fmt;

use crate::spinlock::SpinLock;

/// Delegator function: decomposes the parameter blob and calls the job
/// entry function.
///
/// # Safety
///
/// The pointer must reference a parameter blob written by the matching
/// typed dispatch path (same `T` on both sides).
pub type Invoker = unsafe fn(*const u8);

/// Sentinel invoker index for an unregistered handle
pub const INVALID_INVOKER_IDX: u32 = u32::MAX;

unsafe fn invalid_invoker(_params: *const u8) {
    unreachable!("invoked an invalid job handle");
}

/// Immutable identity of a registered job type
///
/// Equality and ordering are defined by name, so handles can live in a
/// name-sorted table for lookup. Names must be unique per registry.
#[derive(Clone, Copy)]
pub struct JobHandle {
    name: &'static str,
    job_id: u32,
    invoker_idx: u32,
    invoker: Invoker,
}

impl JobHandle {
    /// Sentinel handle that fails validity checks
    pub const INVALID: JobHandle = JobHandle {
        name: "",
        job_id: u32::MAX,
        invoker_idx: INVALID_INVOKER_IDX,
        invoker: invalid_invoker,
    };

    /// Display name of the job
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Dense per-registry job id
    #[inline]
    pub fn job_id(&self) -> u32 {
        self.job_id
    }

    /// Index into the invoker table (used for job switching in the
    /// producer/consumer queue)
    #[inline]
    pub fn invoker_idx(&self) -> u32 {
        self.invoker_idx
    }

    /// The invoker function
    #[inline]
    pub fn invoker(&self) -> Invoker {
        self.invoker
    }

    /// Check this handle names a registered job
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.invoker_idx != INVALID_INVOKER_IDX
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for JobHandle {}

impl PartialOrd for JobHandle {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobHandle {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.name.cmp(other.name)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "JobHandle({:?}, id={})", self.name, self.job_id)
        } else {
            write!(f, "JobHandle(INVALID)")
        }
    }
}

/// Thread-safe, name-sorted job registry
///
/// Lookup-or-register is the only mutation; a registered name keeps its
/// handle for the lifetime of the registry.
pub struct JobRegistry {
    // sorted by name; index order defines invoker_idx
    entries: SpinLock<Vec<JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(Vec::new()),
        }
    }

    /// Look up a handle by name, registering it with `invoker` if absent
    ///
    /// Safe to call from any thread, before or after backend init.
    pub fn get_job_handle(&self, name: &str, invoker: Invoker) -> JobHandle {
        let mut entries = self.entries.lock();
        if let Some(handle) = entries.iter().find(|h| h.name == name) {
            return *handle;
        }

        // Names must outlive every handle that points at them; the
        // registry lives for the process, so leaking is the contract.
        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let handle = JobHandle {
            name,
            job_id: entries.len() as u32,
            invoker_idx: entries.len() as u32,
            invoker,
        };
        entries.push(handle);
        handle
    }

    /// Look up the invoker registered under `invoker_idx`
    pub fn invoker_by_idx(&self, invoker_idx: u32) -> Option<Invoker> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|h| h.invoker_idx == invoker_idx)
            .map(|h| h.invoker)
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn test_invoker(_p: *const u8) {}

    #[test]
    fn test_handle_identity_stable() {
        let reg = JobRegistry::new();
        let a = reg.get_job_handle("physics_step", test_invoker);
        let b = reg.get_job_handle("physics_step", test_invoker);
        assert_eq!(a, b);
        assert_eq!(a.job_id(), b.job_id());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_handle_ordering_by_name() {
        let reg = JobRegistry::new();
        let z = reg.get_job_handle("zlib_inflate", test_invoker);
        let a = reg.get_job_handle("animation", test_invoker);
        assert!(a < z);
        assert_ne!(a, z);
    }

    #[test]
    fn test_invalid_handle() {
        assert!(!JobHandle::INVALID.is_valid());
        let reg = JobRegistry::new();
        let h = reg.get_job_handle("cull", test_invoker);
        assert!(h.is_valid());
    }

    #[test]
    fn test_concurrent_registration() {
        use std::sync::Arc;
        use std::thread;

        let reg = Arc::new(JobRegistry::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                reg.get_job_handle("shared_job", test_invoker).job_id()
            }));
        }

        let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(reg.len(), 1);
    }
}
