//! Unix stack mapping using mmap

use std::sync::OnceLock;

use cosched_core::kdebug;
use cosched_core::MemoryError;

use super::Stack;

/// System page size, queried once.
pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if ret > 0 { ret as usize } else { 4096 }
    })
}

impl Stack {
    /// Map a stack with at least `size` usable bytes plus one guard page.
    ///
    /// `size` is rounded up to a whole number of pages.
    pub fn allocate(size: usize) -> Result<Self, MemoryError> {
        let page = page_size();
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }
        let size = size
            .checked_next_multiple_of(page)
            .ok_or(MemoryError::InvalidSize)?;
        let mapped = size.checked_add(page).ok_or(MemoryError::InvalidSize)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        // Stack grows down, so the guard sits at the low end
        let ret = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, mapped) };
            return Err(MemoryError::ProtectionFailed);
        }

        Ok(Stack { base: base as *mut u8, mapped, size })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base as *mut libc::c_void, self.mapped) };
        if ret != 0 {
            kdebug!("munmap of stack at {:p} failed", self.base);
        }
    }
}
