//! Coroutine stacks
//!
//! Each stack is its own anonymous mapping with a no-access guard page
//! below the usable region, so an overflow faults instead of corrupting
//! a neighbour.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::page_size;
    }
}

/// One coroutine stack.
///
/// Layout, low to high: `[guard page][usable bytes]`. The stack grows
/// down from `top()`.
pub struct Stack {
    /// Start of the mapping (the guard page)
    base: *mut u8,
    /// Total mapped bytes, guard included
    mapped: usize,
    /// Usable bytes above the guard
    size: usize,
}

impl Stack {
    /// Exclusive upper end of the usable region.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base + mapped is one past the end of our own mapping.
        unsafe { self.base.add(self.mapped) }
    }

    /// Lowest usable address (just above the guard page).
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: the guard is exactly mapped - size bytes.
        unsafe { self.base.add(self.mapped - self.size) }
    }

    /// Usable bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Guard region as (start, len).
    #[inline]
    pub fn guard(&self) -> (*mut u8, usize) {
        (self.base, self.mapped - self.size)
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("top", &self.top())
            .field("size", &self.size)
            .finish()
    }
}
