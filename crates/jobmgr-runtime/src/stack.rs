//! Fiber memory regions
//!
//! Each fiber owns one contiguous mapping: the task header at the base,
//! a `PROT_NONE` guard page, then the stack. The stack grows down toward
//! the guard, so an overflow faults instead of corrupting the header.
//!
//! ```text
//! base                                        base + len
//! | header (page aligned) | guard page | stack ... top |
//! ```

use core::ptr::NonNull;

use jobmgr_core::error::{JobError, JobResult};

/// Page size assumed for guard placement
pub const PAGE_SIZE: usize = 4096;

#[inline]
fn page_align(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// One mapped header+stack region; header and stack live and die together
pub(crate) struct FiberRegion {
    base: NonNull<u8>,
    len: usize,
    header_len: usize,
}

impl FiberRegion {
    /// Map a region holding `header_size` bytes of header plus a stack
    pub fn map(header_size: usize, stack_size: usize) -> JobResult<Self> {
        let header_len = page_align(header_size);
        let stack_len = page_align(stack_size);
        let len = header_len + PAGE_SIZE + stack_len;

        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(JobError::Unknown);
        }

        // Guard page between header and stack bottom stays inaccessible
        let guard = unsafe { (base as *mut u8).add(header_len) };
        let ret = unsafe { libc::mprotect(guard as *mut libc::c_void, PAGE_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, len) };
            return Err(JobError::Unknown);
        }

        Ok(Self {
            // Safety: mmap success means non-null
            base: unsafe { NonNull::new_unchecked(base as *mut u8) },
            len,
            header_len,
        })
    }

    /// Base of the region, where the task header lives
    #[inline]
    pub fn header_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Top of the stack (highest address; stacks grow down)
    #[inline]
    pub fn stack_top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Unmap the whole region
    ///
    /// # Safety
    ///
    /// No live references into the region (header or stack frames) may
    /// remain.
    pub unsafe fn unmap(base: *mut u8, len: usize) {
        unsafe { libc::munmap(base as *mut libc::c_void, len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_unmap() {
        let region = FiberRegion::map(256, 16 * 1024).unwrap();
        let header = region.header_ptr();
        assert!(!header.is_null());
        assert!(region.stack_top() as usize > header as usize);
        // header area is writable
        unsafe { core::ptr::write_bytes(header, 0xAB, 256) };
        unsafe { FiberRegion::unmap(header, region.len()) };
    }

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(1), PAGE_SIZE);
        assert_eq!(page_align(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }
}
