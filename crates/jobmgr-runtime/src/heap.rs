//! Job-scoped allocator
//!
//! Memory handed out here is owned by the backend: callers free it
//! through `free` and never through any other path. The heap keeps a
//! ledger of outstanding layouts so `free` can rebuild each `Layout`
//! and leaks are visible through `allocated_bytes`.

use std::alloc::Layout;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use jobmgr_core::spinlock::SpinLock;
use jobmgr_core::jm_warn;

/// Allocator for job-lifetime memory (ring buffers, parameter areas)
pub struct JobHeap {
    ledger: SpinLock<HashMap<usize, Layout>>,
    outstanding: AtomicUsize,
}

impl JobHeap {
    pub fn new() -> Self {
        Self {
            ledger: SpinLock::new(HashMap::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Allocate `size` bytes at `align`; null on bad parameters or OOM
    pub fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let layout = match Layout::from_size_align(size.max(1), align.max(1)) {
            Ok(l) => l,
            Err(_) => return core::ptr::null_mut(),
        };

        // Safety: layout has non-zero size
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            return ptr;
        }

        self.ledger.lock().insert(ptr as usize, layout);
        self.outstanding.fetch_add(layout.size(), Ordering::Relaxed);
        ptr
    }

    /// Return memory obtained from `allocate`
    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let layout = self.ledger.lock().remove(&(ptr as usize));
        match layout {
            Some(layout) => {
                self.outstanding.fetch_sub(layout.size(), Ordering::Relaxed);
                // Safety: ptr/layout pair came from allocate
                unsafe { std::alloc::dealloc(ptr, layout) };
            }
            None => {
                jm_warn!("free of pointer not owned by the job heap: {:p}", ptr);
            }
        }
    }

    /// Bytes currently outstanding
    pub fn allocated_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

impl Default for JobHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobHeap {
    fn drop(&mut self) {
        // release anything still outstanding at backend teardown
        let ledger = std::mem::take(&mut *self.ledger.lock());
        for (ptr, layout) in ledger {
            // Safety: entries are live allocate results
            unsafe { std::alloc::dealloc(ptr as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_roundtrip() {
        let heap = JobHeap::new();
        let ptr = heap.allocate(256, 64);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 64, 0);
        assert_eq!(heap.allocated_bytes(), 256);

        heap.free(ptr);
        assert_eq!(heap.allocated_bytes(), 0);
    }

    #[test]
    fn test_free_null_is_noop() {
        let heap = JobHeap::new();
        heap.free(core::ptr::null_mut());
        assert_eq!(heap.allocated_bytes(), 0);
    }

    #[test]
    fn test_bad_align_returns_null() {
        let heap = JobHeap::new();
        assert!(heap.allocate(16, 3).is_null());
    }
}
